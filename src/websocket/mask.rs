/// XOR `buf` with `key` in place. `offset` is the position of `buf[0]`
/// within the masked payload, so a payload can be masked in pieces.
///
/// Applying the same key twice restores the input.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(offset + i) & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_involution() {
        let key = [0xDE, 0xAD, 0xBE, 0xEF];
        let original: Vec<u8> = (0..=255u8).collect();
        let mut data = original.clone();

        apply_mask(&mut data, key, 0);
        assert_ne!(data, original);
        apply_mask(&mut data, key, 0);
        assert_eq!(data, original);
    }

    #[test]
    fn test_mask_in_pieces_matches_whole() {
        let key = [1, 2, 3, 4];
        let mut whole = b"fragmented payload".to_vec();
        let mut pieces = whole.clone();

        apply_mask(&mut whole, key, 0);
        let (head, tail) = pieces.split_at_mut(5);
        apply_mask(head, key, 0);
        apply_mask(tail, key, 5);

        assert_eq!(whole, pieces);
    }
}
