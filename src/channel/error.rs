//! Channel close reasons and errors.

use std::fmt;
use thiserror::Error;

use crate::channel::encoder::EncodeError;
use crate::net::transport::TransportError;
use crate::pipeline::FilterError;

/// Why a channel closed. Set at most once; the first writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Unknown,
    /// The server is shutting down.
    ServerShutdown,
    /// The peer closed the connection.
    RemoteClosing,
    /// This side asked to close.
    LocalClosing,
    /// The application closed the channel because of its own error.
    ApplicationError,
    /// The transport failed.
    SocketError,
    /// A timeout policy closed the channel.
    TimeOut,
    /// The peer sent malformed or oversized input.
    ProtocolError,
    /// A pump failed unexpectedly.
    InternalError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unknown => "unknown",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::RemoteClosing => "remote_closing",
            CloseReason::LocalClosing => "local_closing",
            CloseReason::ApplicationError => "application_error",
            CloseReason::SocketError => "socket_error",
            CloseReason::TimeOut => "timeout",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::InternalError => "internal_error",
        }
    }

    /// Whether the close was caused by a failure rather than a request.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::ApplicationError
                | CloseReason::SocketError
                | CloseReason::ProtocolError
                | CloseReason::InternalError
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of a channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Transport attached, pumps not running.
    Created = 0,
    /// Both pumps running.
    Running = 1,
    /// Close requested, pumps draining.
    Closing = 2,
    /// Pumps joined and transport released.
    Closed = 3,
}

impl From<u8> for ChannelState {
    fn from(val: u8) -> Self {
        match val {
            0 => ChannelState::Created,
            1 => ChannelState::Running,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Errors surfaced by channel operations and pumps.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel is closing or closed.
    #[error("channel is closed")]
    Closed,

    /// The write pump is `send_queue_capacity` chunks behind.
    #[error("send queue is full")]
    SendQueueFull,

    /// `start` was called twice.
    #[error("channel was already started")]
    AlreadyStarted,

    /// Buffered bytes of one package went over the configured maximum.
    #[error("package of {size} bytes exceeds the maximum package length of {max} bytes")]
    PackageTooLarge { size: usize, max: usize },

    /// The active filter rejected the input.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FilterError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode package: {0}")]
    Encode(#[from] EncodeError),

    /// A pump task panicked or was aborted.
    #[error("channel pump failed: {0}")]
    Internal(String),
}

impl ChannelError {
    /// The close reason this error forces onto its channel.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            ChannelError::Closed | ChannelError::SendQueueFull => CloseReason::LocalClosing,
            ChannelError::AlreadyStarted | ChannelError::Internal(_) => CloseReason::InternalError,
            ChannelError::PackageTooLarge { .. } | ChannelError::Protocol(_) => {
                CloseReason::ProtocolError
            }
            ChannelError::Transport(TransportError::Interrupted) => CloseReason::LocalClosing,
            ChannelError::Transport(err) if err.is_ignorable() => CloseReason::RemoteClosing,
            ChannelError::Transport(_) => CloseReason::SocketError,
            ChannelError::Encode(_) => CloseReason::ApplicationError,
        }
    }

    /// Ignorable errors close the channel without being reported.
    pub fn is_ignorable(&self) -> bool {
        match self {
            ChannelError::Closed => true,
            ChannelError::Transport(err) => err.is_ignorable(),
            _ => false,
        }
    }
}
