//! WebSocket protocol (RFC 6455) on top of the channel engine.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     bytes → WebSocketFilter::Handshake (HTTP head up to \r\n\r\n)
//!           → Handshake package + DataFilter (next_filter, one-shot)
//!     bytes → WebSocketFilter::Data
//!           → PartMachine<FramePart>: Fixed → [ExtendedLength] → [MaskKey] → Payload
//!           → control frame: emitted at once
//!           → data frame: accumulated until FIN, then emitted as one message
//!
//! Outbound:
//!     WebSocketPackage → WebSocketEncoder (server, unmasked)
//!                      → MaskedWebSocketEncoder (client, random key per frame)
//!                      → one or more frames → PipeChannel send lock
//! ```
//!
//! # Design Decisions
//! - The two filter phases are a sum type, not a chain of trait objects
//! - The parsed handshake header is shared by `Arc` with every package of
//!   the connection
//! - Payload is unmasked while copied into pooled blocks; fragments move
//!   their blocks into the message without copying
//! - Mask keys come from a generator owned by each encoder, so tests can
//!   inject a seeded one

pub mod data;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod handshake;
pub mod header;
pub mod mask;
pub mod opcode;
pub mod package;

pub use data::DataFilter;
pub use encoder::{MaskedWebSocketEncoder, WebSocketEncoder};
pub use error::WebSocketError;
pub use filter::{Role, WebSocketContext, WebSocketFilter, WebSocketOptions};
pub use frame::FramePart;
pub use handshake::{
    accept_key, client_request, generate_key, reject_response, server_response,
    verify_response, HandshakeError, HandshakeFilter, HandshakeResponse,
};
pub use header::HttpHeader;
pub use mask::apply_mask;
pub use opcode::{CloseCode, OpCode};
pub use package::WebSocketPackage;
