//! Frame encoders.
//!
//! Header size follows the payload length: 2 bytes up to 125, 4 bytes up to
//! 65535, 10 bytes beyond. With a fragment size set, data messages larger
//! than it are split into a first frame carrying the message opcode and
//! `Continuation` frames after it; only the last frame has FIN set. Text is
//! only ever split on character boundaries.

use bytes::{BufMut, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::channel::{EncodeError, PackageEncoder};
use crate::websocket::frame::MAX_CONTROL_PAYLOAD;
use crate::websocket::mask::apply_mask;
use crate::websocket::opcode::OpCode;
use crate::websocket::package::{WebSocketPackage, FIN};

/// Smallest fragment size that always fits one UTF-8 character.
pub const MIN_FRAGMENT_SIZE: usize = 4;

/// Encoder for frames sent by a server: never masked.
#[derive(Debug, Clone, Default)]
pub struct WebSocketEncoder {
    max_fragment_size: Option<usize>,
}

impl WebSocketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split data messages into frames of at most `size` payload bytes.
    pub fn with_fragment_size(size: usize) -> Self {
        Self {
            max_fragment_size: Some(size.max(MIN_FRAGMENT_SIZE)),
        }
    }
}

impl PackageEncoder<WebSocketPackage> for WebSocketEncoder {
    fn encode(
        &mut self,
        dst: &mut BytesMut,
        package: &WebSocketPackage,
    ) -> Result<usize, EncodeError> {
        encode_frames(dst, package, self.max_fragment_size, || None)
    }
}

/// Encoder for frames sent by a client: every frame gets a fresh random
/// mask key.
#[derive(Debug, Clone)]
pub struct MaskedWebSocketEncoder<R = StdRng> {
    max_fragment_size: Option<usize>,
    rng: R,
}

impl MaskedWebSocketEncoder<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for MaskedWebSocketEncoder<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> MaskedWebSocketEncoder<R> {
    /// Use `rng` for mask keys; a seeded generator gives reproducible output.
    pub fn with_rng(rng: R) -> Self {
        Self {
            max_fragment_size: None,
            rng,
        }
    }

    pub fn fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = Some(size.max(MIN_FRAGMENT_SIZE));
        self
    }
}

impl<R: RngCore> PackageEncoder<WebSocketPackage> for MaskedWebSocketEncoder<R> {
    fn encode(
        &mut self,
        dst: &mut BytesMut,
        package: &WebSocketPackage,
    ) -> Result<usize, EncodeError> {
        let rng = &mut self.rng;
        encode_frames(dst, package, self.max_fragment_size, || {
            Some(rng.gen::<[u8; 4]>())
        })
    }
}

fn encode_frames<K>(
    dst: &mut BytesMut,
    package: &WebSocketPackage,
    max_fragment_size: Option<usize>,
    mut next_key: K,
) -> Result<usize, EncodeError>
where
    K: FnMut() -> Option<[u8; 4]>,
{
    let op_code = package.op_code;
    if matches!(op_code, OpCode::Handshake | OpCode::Continuation) {
        return Err(EncodeError::InvalidPackage(format!(
            "{op_code} packages cannot be encoded as frames"
        )));
    }

    let chunks: Vec<&[u8]> = match (&package.message, &package.data) {
        (Some(message), _) => vec![message.as_bytes()],
        (None, Some(data)) => data.chunks().collect(),
        (None, None) => Vec::new(),
    };
    let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();

    if op_code.is_control() {
        if total as u64 > MAX_CONTROL_PAYLOAD {
            return Err(EncodeError::ControlFrameTooLarge(total));
        }
        return Ok(write_frame(dst, FIN | op_code.as_u8(), &chunks, 0, total, next_key()));
    }

    let cuts = match (max_fragment_size, &package.message) {
        (Some(max), _) if total <= max => Vec::new(),
        (Some(max), Some(text)) => text_cuts(text, max),
        (Some(max), None) => (1..total.div_ceil(max)).map(|i| i * max).collect(),
        (None, _) => Vec::new(),
    };

    let frames = cuts.len() + 1;
    let ends = cuts.into_iter().chain(std::iter::once(total));
    let mut written = 0;
    let mut start = 0;
    for (index, end) in ends.enumerate() {
        let code = if index == 0 { op_code } else { OpCode::Continuation };
        let fin = if index + 1 == frames { FIN } else { 0 };
        written += write_frame(dst, fin | code.as_u8(), &chunks, start, end, next_key());
        start = end;
    }
    Ok(written)
}

/// Interior cut points splitting `text` into pieces of at most `max` bytes
/// without breaking a character.
fn text_cuts(text: &str, max: usize) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut start = 0;
    while text.len() - start > max {
        let mut end = start + max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // `max` is narrower than this character.
            end = start + max;
            while !text.is_char_boundary(end) {
                end += 1;
            }
            if end == text.len() {
                break;
            }
        }
        cuts.push(end);
        start = end;
    }
    cuts
}

/// Write one frame carrying bytes `start..end` of the concatenated chunks,
/// masking each chunk as it is copied.
fn write_frame(
    dst: &mut BytesMut,
    first_byte: u8,
    chunks: &[&[u8]],
    start: usize,
    end: usize,
    key: Option<[u8; 4]>,
) -> usize {
    let len = end - start;
    let mask_bit = if key.is_some() { 0x80 } else { 0 };
    let before = dst.len();

    dst.reserve(14 + len);
    dst.put_u8(first_byte);
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }
    if let Some(key) = key {
        dst.put_slice(&key);
    }

    let mut position = 0;
    let mut masked = 0;
    for chunk in chunks {
        let chunk_start = position;
        position += chunk.len();
        if position <= start || chunk_start >= end {
            continue;
        }
        let from = start.saturating_sub(chunk_start);
        let to = (end - chunk_start).min(chunk.len());
        let piece = &chunk[from..to];

        let at = dst.len();
        dst.put_slice(piece);
        if let Some(key) = key {
            apply_mask(&mut dst[at..], key, masked);
        }
        masked += piece.len();
    }

    dst.len() - before
}
