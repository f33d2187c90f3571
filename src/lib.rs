//! Socket server framework: duplex pipe channels, pipeline filters and a
//! WebSocket protocol layer.
//!
//! # Architecture Overview
//!
//! ```text
//!     transport (TcpStream, duplex, ...)
//!         │ read pump                         ▲ write pump
//!         ▼                                   │
//!     BytesMut inbound ──▶ PipelineFilter ──▶ ObjectQueue ──▶ PackageReader
//!                          (terminator, fixed header,        (consumer)
//!                           WebSocket handshake → data)           │
//!                                                                 ▼
//!     send lock ◀── PackageEncoder ◀── send_package ◀──── application
//!
//!     Cross-cutting: config (TOML + hot reload), observability
//!     (tracing, metrics), lifecycle (shutdown, signals), net (listener,
//!     connection tracking, transport errors)
//! ```

// Core engine
pub mod buffer;
pub mod channel;
pub mod pipeline;

// Protocols
pub mod websocket;

// Serving
pub mod net;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use channel::{ChannelError, CloseReason, PackageReader, PipeChannel};
pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use server::SocketServer;
