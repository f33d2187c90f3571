//! Decoded WebSocket packages.

use bytes::Bytes;
use std::sync::Arc;

use crate::buffer::BufferSequence;
use crate::websocket::header::HttpHeader;
use crate::websocket::opcode::OpCode;

/// FIN bit of the first header byte.
pub const FIN: u8 = 0x80;

/// RSV1 to RSV3 bits of the first header byte.
pub const RSV_MASK: u8 = 0x70;

/// One handshake, control frame or reassembled logical message.
///
/// Text messages carry their payload in `message`; every other opcode
/// carries it in `data`.
#[derive(Debug)]
pub struct WebSocketPackage {
    pub op_code: OpCode,
    /// FIN and RSV bits as found in the first header byte.
    pub flags: u8,
    pub has_mask: bool,
    /// Declared length of the frame, or the reassembled message length.
    pub payload_length: u64,
    pub mask_key: Option<[u8; 4]>,
    pub message: Option<String>,
    pub data: Option<BufferSequence>,
    /// Handshake of the connection the package arrived on.
    pub header: Option<Arc<HttpHeader>>,
}

impl WebSocketPackage {
    fn new(op_code: OpCode) -> Self {
        Self {
            op_code,
            flags: FIN,
            has_mask: false,
            payload_length: 0,
            mask_key: None,
            message: None,
            data: None,
            header: None,
        }
    }

    pub(crate) fn frame(header: Option<Arc<HttpHeader>>) -> Self {
        Self {
            flags: 0,
            data: Some(BufferSequence::new()),
            header,
            ..Self::new(OpCode::Continuation)
        }
    }

    pub fn handshake(header: Arc<HttpHeader>) -> Self {
        Self {
            header: Some(header),
            ..Self::new(OpCode::Handshake)
        }
    }

    pub fn text(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            payload_length: message.len() as u64,
            message: Some(message),
            ..Self::new(OpCode::Text)
        }
    }

    pub fn binary(data: impl Into<BufferSequence>) -> Self {
        Self::with_data(OpCode::Binary, data.into())
    }

    pub fn ping(data: &[u8]) -> Self {
        Self::with_data(OpCode::Ping, BufferSequence::from_slice(data))
    }

    pub fn pong(data: &[u8]) -> Self {
        Self::with_data(OpCode::Pong, BufferSequence::from_slice(data))
    }

    /// A close frame carrying `code` and a UTF-8 `reason`.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::with_data(OpCode::Close, BufferSequence::from(payload))
    }

    fn with_data(op_code: OpCode, data: BufferSequence) -> Self {
        Self {
            payload_length: data.len() as u64,
            data: Some(data),
            ..Self::new(op_code)
        }
    }

    pub fn fin(&self) -> bool {
        self.flags & FIN != 0
    }

    /// RSV bits, shifted down to 0..=7.
    pub fn rsv(&self) -> u8 {
        (self.flags & RSV_MASK) >> 4
    }

    pub fn is_control(&self) -> bool {
        self.op_code.is_control()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match (&self.message, &self.data) {
            (Some(message), _) => message.len(),
            (None, Some(data)) => data.len(),
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous copy of the payload, whichever field holds it.
    pub fn payload(&self) -> Bytes {
        match (&self.message, &self.data) {
            (Some(message), _) => Bytes::copy_from_slice(message.as_bytes()),
            (None, Some(data)) => data.to_bytes(),
            (None, None) => Bytes::new(),
        }
    }

    /// Status code and reason of a close frame. `None` for other opcodes and
    /// for a close frame without a status.
    pub fn close_status(&self) -> Option<(u16, String)> {
        if self.op_code != OpCode::Close {
            return None;
        }
        let payload = self.data.as_ref()?.to_vec();
        if payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        Some((code, reason))
    }
}
