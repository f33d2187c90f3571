//! WebSocket server built on the channel engine.
//!
//! # Data Flow
//! ```text
//! Listener::accept (connection permit)
//!     → PipeChannel<TcpStream, WebSocketFilter> with options from the
//!       current config snapshot
//!     → session.rs: handshake (timeout) → 101 or 400
//!     → registry.rs: session registered under a uuid
//!     → packages: Ping → Pong, Close → echo + close,
//!                 Text/Binary → MessageHandler → Reply
//!     → Reply::Sender → this channel, Reply::Broadcast → every session
//!
//! Config updates (watcher) → ArcSwap<Settings> → next accepted connection
//! Shutdown → accept loop exits → sessions send 1001 → drain
//! ```
//!
//! # Design Decisions
//! - Each connection reads one config snapshot at accept time; reloads
//!   never alter an open channel
//! - One buffer pool is shared by all connections until `block_size`
//!   changes
//! - Broadcast frames are encoded once and queued as raw bytes

pub mod handler;
pub mod registry;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::BufferPool;
use crate::buffer::pool::DEFAULT_MAX_RETAINED;
use crate::channel::{ChannelOptions, PipeChannel};
use crate::config::{ServerConfig, SessionMode};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::websocket::{WebSocketFilter, WebSocketOptions};

pub use handler::{BroadcastHandler, EchoHandler, MessageHandler, Reply, SessionInfo};
pub use registry::{Registration, SessionRegistry};
pub use session::{Session, SessionSettings};

/// How long shutdown waits for sessions to finish closing.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not
/// spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Config snapshot plus the pool built from it.
#[derive(Debug)]
struct Settings {
    config: ServerConfig,
    pool: BufferPool,
}

impl Settings {
    fn new(config: ServerConfig, previous: Option<&Settings>) -> Self {
        let pool = match previous {
            Some(previous) if previous.pool.block_size() == config.channel.block_size => {
                previous.pool.clone()
            }
            _ => BufferPool::new(config.channel.block_size, DEFAULT_MAX_RETAINED),
        };
        Self { config, pool }
    }
}

/// Accepts TCP connections and runs a WebSocket session on each.
pub struct SocketServer {
    settings: ArcSwap<Settings>,
    registry: SessionRegistry<TcpStream>,
    tracker: ConnectionTracker,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl SocketServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            settings: ArcSwap::from_pointee(Settings::new(config, None)),
            registry: SessionRegistry::new(),
            tracker: ConnectionTracker::new(),
            handler: None,
        }
    }

    /// Use `handler` for every session instead of the one selected by
    /// `websocket.mode`.
    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// The config new connections are currently created with.
    pub fn config(&self) -> ServerConfig {
        self.settings.load().config.clone()
    }

    pub fn registry(&self) -> &SessionRegistry<TcpStream> {
        &self.registry
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Swap in a new configuration for connections accepted from now on.
    pub fn apply_config(&self, config: ServerConfig) {
        let current = self.settings.load();
        info!(
            max_package_length = config.channel.max_package_length,
            mode = ?config.websocket.mode,
            "Configuration updated"
        );
        self.settings.store(Arc::new(Settings::new(config, Some(&current))));
    }

    /// Accept connections until `shutdown` fires, then wait for open
    /// sessions to close.
    pub async fn run(
        &self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ServerConfig>,
        shutdown: Shutdown,
    ) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "WebSocket server accepting connections");
        }

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => break,
                Some(config) = config_updates.recv() => self.apply_config(config),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let session = self.session(stream, &shutdown).with_peer_addr(peer_addr);
                        let guard = self.tracker.track();
                        tokio::spawn(async move {
                            let reason = session.run().await;
                            debug!(peer_addr = %peer_addr, reason = %reason, "Connection finished");
                            drop(guard);
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        info!(
            active = self.tracker.active_count(),
            "Stopped accepting, draining sessions"
        );
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout reached, abandoning sessions"
            );
        }
        Ok(())
    }

    fn session(&self, stream: TcpStream, shutdown: &Shutdown) -> Session<TcpStream> {
        let settings = self.settings.load();
        let config = &settings.config;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let filter = WebSocketFilter::server(WebSocketOptions {
            require_mask: config.websocket.require_mask,
            pool: settings.pool.clone(),
        });
        let channel = PipeChannel::new(stream, filter, ChannelOptions::from(&config.channel));

        let handler = match &self.handler {
            Some(handler) => Arc::clone(handler),
            None => match config.websocket.mode {
                SessionMode::Echo => Arc::new(EchoHandler) as Arc<dyn MessageHandler>,
                SessionMode::Broadcast => Arc::new(BroadcastHandler),
            },
        };

        Session::new(
            channel,
            SessionSettings::from(&config.websocket),
            handler,
            self.registry.clone(),
            shutdown.subscribe(),
        )
    }
}
