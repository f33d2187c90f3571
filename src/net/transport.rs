//! Transport contract consumed by channels.
//!
//! # Responsibilities
//! - Name the byte-stream bound a channel can run over
//! - Classify I/O failures as ignorable teardown noise or fatal errors
//!
//! # Design Decisions
//! - Any `AsyncRead + AsyncWrite` stream qualifies: TCP, TLS, in-memory duplex
//! - Classification is a value match on `TransportError`, done once where the
//!   `io::Error` is produced

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream a channel can own.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Failure of a transport read, write or flush.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer went away mid-operation (reset, aborted, broken pipe).
    #[error("connection dropped by peer ({0:?})")]
    Disconnected(io::ErrorKind),

    /// The operation was interrupted locally.
    #[error("transport operation interrupted")]
    Interrupted,

    /// Any other I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    /// Ignorable failures are expected during teardown and are not reported.
    pub fn is_ignorable(&self) -> bool {
        !matches!(self, TransportError::Io(_))
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportError::Disconnected(err.kind()),
            io::ErrorKind::Interrupted => TransportError::Interrupted,
            _ => TransportError::Io(err),
        }
    }
}
