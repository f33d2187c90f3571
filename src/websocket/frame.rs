//! Frame parts for the part machine.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Fixed → [ExtendedLength] → [MaskKey] → [Payload] → Complete

use crate::pipeline::{FilterError, PartReader, PartStep, SequenceReader};
use crate::websocket::error::WebSocketError;
use crate::websocket::filter::{Role, WebSocketContext};
use crate::websocket::opcode::OpCode;
use crate::websocket::package::{WebSocketPackage, FIN, RSV_MASK};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// The part of a frame the machine is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    /// The two fixed header bytes.
    Fixed,
    /// A 2 or 8 byte big-endian length.
    ExtendedLength(usize),
    MaskKey,
    /// Payload bytes still expected.
    Payload { remaining: u64 },
}

impl FramePart {
    /// The part following a known payload length.
    fn after_length(package: &WebSocketPackage) -> PartStep<FramePart> {
        if package.has_mask {
            PartStep::Next(FramePart::MaskKey)
        } else {
            FramePart::payload(package)
        }
    }

    fn payload(package: &WebSocketPackage) -> PartStep<FramePart> {
        if package.payload_length == 0 {
            PartStep::Complete
        } else {
            PartStep::Next(FramePart::Payload {
                remaining: package.payload_length,
            })
        }
    }
}

impl PartReader for FramePart {
    type Package = WebSocketPackage;
    type Context = WebSocketContext;

    fn initial() -> Self {
        FramePart::Fixed
    }

    fn create_package(context: &WebSocketContext) -> WebSocketPackage {
        WebSocketPackage::frame(Some(context.header.clone()))
    }

    fn process(
        &mut self,
        context: &WebSocketContext,
        package: &mut WebSocketPackage,
        reader: &mut SequenceReader<'_>,
    ) -> Result<PartStep<Self>, FilterError> {
        match self {
            FramePart::Fixed => {
                let Some(header) = reader.try_take(2) else {
                    return Ok(PartStep::NeedMoreData);
                };
                let (first, second) = (header[0], header[1]);

                if first & RSV_MASK != 0 {
                    return Err(WebSocketError::ReservedBits(first & RSV_MASK).into());
                }
                let op_code = OpCode::from_wire(first & 0x0F)
                    .ok_or(WebSocketError::UnknownOpCode(first & 0x0F))?;
                let fin = first & FIN != 0;
                let has_mask = second & 0x80 != 0;
                let length_hint = second & 0x7F;

                if op_code.is_control() {
                    if !fin {
                        return Err(WebSocketError::FragmentedControlFrame.into());
                    }
                    if u64::from(length_hint) > MAX_CONTROL_PAYLOAD {
                        return Err(
                            WebSocketError::ControlFrameTooLarge(u64::from(length_hint)).into(),
                        );
                    }
                }
                match context.role {
                    Role::Server if context.require_mask && !has_mask => {
                        return Err(WebSocketError::MissingMask.into());
                    }
                    Role::Client if has_mask => {
                        return Err(WebSocketError::UnexpectedMask.into());
                    }
                    _ => {}
                }

                package.op_code = op_code;
                package.flags = first & (FIN | RSV_MASK);
                package.has_mask = has_mask;

                match length_hint {
                    126 => Ok(PartStep::Next(FramePart::ExtendedLength(2))),
                    127 => Ok(PartStep::Next(FramePart::ExtendedLength(8))),
                    n => {
                        package.payload_length = u64::from(n);
                        Ok(FramePart::after_length(package))
                    }
                }
            }

            FramePart::ExtendedLength(width) => {
                let length = if *width == 2 {
                    reader.try_read_be_u16().map(u64::from)
                } else {
                    reader.try_read_be_u64()
                };
                let Some(length) = length else {
                    return Ok(PartStep::NeedMoreData);
                };
                if length >> 63 != 0 {
                    return Err(WebSocketError::InvalidLength.into());
                }
                package.payload_length = length;
                Ok(FramePart::after_length(package))
            }

            FramePart::MaskKey => {
                let mut key = [0u8; 4];
                if !reader.try_copy_to(&mut key) {
                    return Ok(PartStep::NeedMoreData);
                }
                package.mask_key = Some(key);
                Ok(FramePart::payload(package))
            }

            FramePart::Payload { remaining } => {
                let available = reader.remaining() as u64;
                if available == 0 {
                    return Ok(PartStep::NeedMoreData);
                }
                // Bounded by `available`, so the cast cannot truncate.
                let n = (*remaining).min(available) as usize;
                let offset = (package.payload_length - *remaining) as usize;
                let bytes = reader.take(n);

                let data = package.data.get_or_insert_with(Default::default);
                match package.mask_key {
                    Some(key) => data.extend_unmasked(&context.pool, bytes, key, offset),
                    None => data.extend_from_slice(&context.pool, bytes),
                }

                *remaining -= n as u64;
                if *remaining == 0 {
                    Ok(PartStep::Complete)
                } else {
                    Ok(PartStep::NeedMoreData)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PartMachine;
    use crate::websocket::filter::WebSocketContext;

    fn run(
        context: &WebSocketContext,
        bytes: &[u8],
    ) -> Result<Option<WebSocketPackage>, FilterError> {
        let mut machine = PartMachine::<FramePart>::new();
        let mut reader = SequenceReader::new(bytes);
        machine.run(context, &mut reader)
    }

    #[test]
    fn test_unmasked_short_frame() {
        let context = WebSocketContext::for_tests(Role::Client, false);
        let frame = run(&context, &[0x81, 0x05, b'h', b'e', b'l', b'l', b'o'])
            .unwrap()
            .unwrap();
        assert_eq!(frame.op_code, OpCode::Text);
        assert!(frame.fin());
        assert_eq!(frame.payload_length, 5);
        assert_eq!(frame.data.unwrap().to_vec(), b"hello");
    }

    #[test]
    fn test_masked_payload_unmasked() {
        let context = WebSocketContext::for_tests(Role::Server, true);
        let frame = run(&context, &[0x82, 0x81, 0x01, 0x02, 0x03, 0x04, 0x41])
            .unwrap()
            .unwrap();
        assert!(frame.has_mask);
        assert_eq!(frame.mask_key, Some([1, 2, 3, 4]));
        assert_eq!(frame.data.unwrap().to_vec(), vec![0x40]);
    }

    #[test]
    fn test_extended_16_bit_length() {
        let context = WebSocketContext::for_tests(Role::Client, false);
        let mut bytes = vec![0x82, 0x7E, 0x00, 0x82];
        bytes.extend(std::iter::repeat(7u8).take(130));
        let frame = run(&context, &bytes).unwrap().unwrap();
        assert_eq!(frame.payload_length, 130);
        assert_eq!(frame.data.unwrap().len(), 130);
    }

    #[test]
    fn test_extended_64_bit_length() {
        let context = WebSocketContext::for_tests(Role::Client, false);
        let mut bytes = vec![0x82, 0x7F];
        bytes.extend_from_slice(&70_000u64.to_be_bytes());
        bytes.extend(std::iter::repeat(1u8).take(70_000));
        let frame = run(&context, &bytes).unwrap().unwrap();
        assert_eq!(frame.payload_length, 70_000);
        assert_eq!(frame.data.unwrap().len(), 70_000);
    }

    #[test]
    fn test_64_bit_length_msb_rejected() {
        let context = WebSocketContext::for_tests(Role::Client, false);
        let mut bytes = vec![0x82, 0x7F];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert!(run(&context, &bytes).is_err());
    }

    #[test]
    fn test_header_violations() {
        let server = WebSocketContext::for_tests(Role::Server, true);
        let client = WebSocketContext::for_tests(Role::Client, false);

        // unmasked frame at a server that requires masks
        assert!(run(&server, &[0x81, 0x00]).is_err());
        // masked frame at a client
        assert!(run(&client, &[0x81, 0x80, 0, 0, 0, 0]).is_err());
        // RSV1 without extension
        assert!(run(&client, &[0xC1, 0x00]).is_err());
        // opcode 0x3 is reserved
        assert!(run(&client, &[0x83, 0x00]).is_err());
        // fragmented ping
        assert!(run(&client, &[0x09, 0x00]).is_err());
        // ping with a 126-byte length hint
        assert!(run(&client, &[0x89, 0x7E, 0x00, 0x7E]).is_err());
    }

    #[test]
    fn test_resumes_at_same_part() {
        let context = WebSocketContext::for_tests(Role::Server, true);
        let bytes = [0x81, 0x83, 0x01, 0x02, 0x03, 0x04, b'a' ^ 1, b'b' ^ 2, b'c' ^ 3];
        let mut machine = PartMachine::<FramePart>::new();

        let mut reader = SequenceReader::new(&bytes[..4]);
        assert!(machine.run(&context, &mut reader).unwrap().is_none());
        assert_eq!(*machine.current(), FramePart::MaskKey);
        assert_eq!(reader.consumed(), 2);

        let mut reader = SequenceReader::new(&bytes[2..7]);
        assert!(machine.run(&context, &mut reader).unwrap().is_none());
        assert_eq!(*machine.current(), FramePart::Payload { remaining: 2 });

        let mut reader = SequenceReader::new(&bytes[7..]);
        let frame = machine.run(&context, &mut reader).unwrap().unwrap();
        assert_eq!(frame.data.unwrap().to_vec(), b"abc");
    }
}
