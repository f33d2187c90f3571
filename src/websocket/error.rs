//! WebSocket protocol violations.

use thiserror::Error;

use crate::pipeline::FilterError;
use crate::websocket::opcode::{CloseCode, OpCode};

/// Frame or handshake input that violates RFC 6455.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebSocketError {
    #[error("reserved bits set without a negotiated extension (0x{0:02x})")]
    ReservedBits(u8),

    #[error("unknown opcode 0x{0:x}")]
    UnknownOpCode(u8),

    #[error("control frame must not be fragmented")]
    FragmentedControlFrame,

    #[error("control frame payload of {0} bytes exceeds 125 bytes")]
    ControlFrameTooLarge(u64),

    #[error("frame from client is not masked")]
    MissingMask,

    #[error("frame from server must not be masked")]
    UnexpectedMask,

    #[error("64-bit payload length has its most significant bit set")]
    InvalidLength,

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("{0} frame received while a fragmented message is in progress")]
    MessageInProgress(OpCode),

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("close frame payload must be empty or at least 2 bytes")]
    InvalidClosePayload,

    #[error("invalid close code {0}")]
    InvalidCloseCode(u16),

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),
}

impl WebSocketError {
    /// Close code to report to the peer for this violation.
    pub fn close_code(&self) -> u16 {
        match self {
            WebSocketError::InvalidUtf8 => CloseCode::INVALID_PAYLOAD,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}

impl From<WebSocketError> for FilterError {
    fn from(err: WebSocketError) -> Self {
        FilterError::Protocol(Box::new(err))
    }
}
