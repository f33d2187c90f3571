//! Two-phase WebSocket pipeline filter.

use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::pipeline::{FilterError, PipelineFilter, SequenceReader};
use crate::websocket::data::DataFilter;
use crate::websocket::handshake::HandshakeFilter;
use crate::websocket::header::HttpHeader;
use crate::websocket::package::WebSocketPackage;

/// Which side of the connection this filter decodes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Parses a request line and client frames.
    Server,
    /// Parses a status line and server frames.
    Client,
}

/// Settings fixed for the lifetime of a connection.
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// Reject unmasked client frames (server role only).
    pub require_mask: bool,
    /// Blocks for payload accumulation.
    pub pool: BufferPool,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            require_mask: true,
            pool: BufferPool::default(),
        }
    }
}

/// State shared from the handshake into the data phase.
#[derive(Debug)]
pub struct WebSocketContext {
    pub role: Role,
    pub require_mask: bool,
    pub header: Arc<HttpHeader>,
    /// Extensions offered in `Sec-WebSocket-Extensions`. None are
    /// negotiated, so frames with RSV bits are still rejected.
    pub extensions: Vec<String>,
    pub pool: BufferPool,
}

impl WebSocketContext {
    pub fn new(role: Role, options: &WebSocketOptions, header: Arc<HttpHeader>) -> Self {
        let extensions = header
            .tokens("sec-websocket-extensions")
            .map(str::to_string)
            .collect();
        Self {
            role,
            require_mask: role == Role::Server && options.require_mask,
            header,
            extensions,
            pool: options.pool.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(role: Role, require_mask: bool) -> Self {
        let options = WebSocketOptions {
            require_mask,
            pool: BufferPool::new(64, 16),
        };
        Self::new(role, &options, Arc::new(HttpHeader::default()))
    }
}

/// The active phase of a WebSocket connection's filter.
///
/// Starts in `Handshake`; the engine swaps in `Data` once the handshake
/// package has been produced, and never switches back.
#[derive(Debug)]
pub enum WebSocketFilter {
    Handshake(HandshakeFilter),
    Data(DataFilter),
}

impl WebSocketFilter {
    pub fn server(options: WebSocketOptions) -> Self {
        WebSocketFilter::Handshake(HandshakeFilter::new(Role::Server, options))
    }

    pub fn client(options: WebSocketOptions) -> Self {
        WebSocketFilter::Handshake(HandshakeFilter::new(Role::Client, options))
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, WebSocketFilter::Handshake(_))
    }
}

impl PipelineFilter for WebSocketFilter {
    type Package = WebSocketPackage;

    fn filter(
        &mut self,
        reader: &mut SequenceReader<'_>,
    ) -> Result<Option<WebSocketPackage>, FilterError> {
        match self {
            WebSocketFilter::Handshake(filter) => filter.filter(reader),
            WebSocketFilter::Data(filter) => filter.filter(reader),
        }
    }

    fn reset(&mut self) {
        match self {
            WebSocketFilter::Handshake(filter) => filter.reset(),
            WebSocketFilter::Data(filter) => filter.reset(),
        }
    }

    fn retained(&self) -> usize {
        match self {
            WebSocketFilter::Handshake(_) => 0,
            WebSocketFilter::Data(filter) => filter.retained(),
        }
    }

    fn next_filter(&mut self) -> Option<Self> {
        match self {
            WebSocketFilter::Handshake(filter) => filter.take_next().map(WebSocketFilter::Data),
            WebSocketFilter::Data(_) => None,
        }
    }
}
