//! Per-connection WebSocket session loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::channel::{
    ChannelError, CloseReason, PackageEncoder, PackageReader, PipeChannel,
};
use crate::config::WebSocketConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::Transport;
use crate::observability::metrics;
use crate::server::handler::{MessageHandler, Reply, SessionInfo};
use crate::server::registry::SessionRegistry;
use crate::websocket::{
    reject_response, server_response, CloseCode, OpCode, WebSocketEncoder, WebSocketFilter,
    WebSocketPackage,
};

/// Per-session policy taken from the configuration at accept time.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub handshake_timeout: Duration,
    pub sub_protocols: Vec<String>,
    pub max_fragment_size: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

impl From<&WebSocketConfig> for SessionSettings {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            sub_protocols: config.sub_protocols.clone(),
            max_fragment_size: config.max_fragment_size,
        }
    }
}

enum Event {
    Shutdown,
    Package(Option<WebSocketPackage>),
}

/// Drives one server-side WebSocket connection from handshake to close.
pub struct Session<T> {
    channel: PipeChannel<T, WebSocketFilter>,
    settings: SessionSettings,
    handler: Arc<dyn MessageHandler>,
    registry: SessionRegistry<T>,
    shutdown: ShutdownSignal,
    peer_addr: Option<SocketAddr>,
    encoder: WebSocketEncoder,
}

impl<T: Transport> Session<T> {
    pub fn new(
        channel: PipeChannel<T, WebSocketFilter>,
        settings: SessionSettings,
        handler: Arc<dyn MessageHandler>,
        registry: SessionRegistry<T>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let encoder = match settings.max_fragment_size {
            Some(size) => WebSocketEncoder::with_fragment_size(size),
            None => WebSocketEncoder::new(),
        };
        Self {
            channel,
            settings,
            handler,
            registry,
            shutdown,
            peer_addr: None,
            encoder,
        }
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Run until the channel closes and return why it closed.
    pub async fn run(mut self) -> CloseReason {
        self.channel.on_error(|err| {
            if matches!(
                err,
                ChannelError::Protocol(_) | ChannelError::PackageTooLarge { .. }
            ) {
                metrics::record_protocol_error("frame");
            }
        });

        let mut packages = match self.channel.start() {
            Ok(packages) => packages,
            Err(e) => {
                warn!(channel_id = %self.channel.id(), error = %e, "Session could not start channel");
                return self.channel.close(CloseReason::InternalError).await;
            }
        };

        if let Some(session) = self.handshake(&mut packages).await {
            let _registration = self.registry.register(session.id, self.channel.clone());
            metrics::record_session_opened();
            info!(
                session_id = %session.id,
                channel_id = %session.channel_id,
                path = %session.path,
                protocol = ?session.protocol,
                "WebSocket session opened"
            );
            self.serve(&session, &mut packages).await;
        }

        let reason = self.channel.closed().await.unwrap_or(CloseReason::Unknown);
        debug!(channel_id = %self.channel.id(), reason = %reason, "Session ended");
        reason
    }

    async fn next_event(&mut self, packages: &mut PackageReader<WebSocketPackage>) -> Event {
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => Event::Shutdown,
            package = packages.next() => Event::Package(package),
        }
    }

    async fn handshake(
        &mut self,
        packages: &mut PackageReader<WebSocketPackage>,
    ) -> Option<SessionInfo> {
        let timeout = self.settings.handshake_timeout;
        let result = tokio::time::timeout(timeout, self.next_event(packages)).await;
        let event = match result {
            Ok(event) => event,
            Err(_) => {
                debug!(channel_id = %self.channel.id(), ?timeout, "Handshake timed out");
                self.channel.close(CloseReason::TimeOut).await;
                return None;
            }
        };

        let package = match event {
            Event::Shutdown => {
                self.channel.close(CloseReason::ServerShutdown).await;
                return None;
            }
            Event::Package(package) => package?,
        };
        let header = match (package.op_code, package.header) {
            (OpCode::Handshake, Some(header)) => header,
            (op_code, _) => {
                warn!(channel_id = %self.channel.id(), %op_code, "Expected handshake package");
                self.channel.close(CloseReason::ProtocolError).await;
                return None;
            }
        };

        match server_response(&header, &self.settings.sub_protocols) {
            Ok(response) => {
                self.channel.send(response.text.as_bytes()).await.ok()?;
                Some(SessionInfo {
                    id: Uuid::new_v4(),
                    channel_id: self.channel.id(),
                    peer_addr: self.peer_addr,
                    path: header.path.clone(),
                    protocol: response.protocol,
                })
            }
            Err(e) => {
                warn!(channel_id = %self.channel.id(), error = %e, "Handshake rejected");
                metrics::record_protocol_error("handshake");
                let _ = self.channel.send(reject_response(&e).as_bytes()).await;
                self.channel.close(CloseReason::ProtocolError).await;
                None
            }
        }
    }

    async fn serve(
        &mut self,
        session: &SessionInfo,
        packages: &mut PackageReader<WebSocketPackage>,
    ) {
        loop {
            let event = self.next_event(packages).await;
            let package = match event {
                Event::Shutdown => {
                    let going_away = WebSocketPackage::close(CloseCode::GOING_AWAY, "server shutdown");
                    let _ = self.reply(&going_away).await;
                    self.channel.close(CloseReason::ServerShutdown).await;
                    return;
                }
                Event::Package(None) => return,
                Event::Package(Some(package)) => package,
            };

            match package.op_code {
                OpCode::Ping => {
                    let pong = WebSocketPackage::pong(&package.payload());
                    if !self.reply(&pong).await {
                        return;
                    }
                }
                OpCode::Pong => {
                    trace!(session_id = %session.id, "Pong received");
                }
                OpCode::Close => {
                    let code = package
                        .close_status()
                        .map(|(code, _)| code)
                        .unwrap_or(CloseCode::NORMAL);
                    debug!(session_id = %session.id, code, "Close frame received");
                    let _ = self.reply(&WebSocketPackage::close(code, "")).await;
                    self.channel.close(CloseReason::RemoteClosing).await;
                    return;
                }
                OpCode::Text | OpCode::Binary => {
                    let keep_going = match self.handler.handle(session, package) {
                        Reply::None => true,
                        Reply::Sender(reply) => self.reply(&reply).await,
                        Reply::Broadcast(message) => self.broadcast(&message).await,
                    };
                    if !keep_going {
                        return;
                    }
                }
                OpCode::Continuation | OpCode::Handshake => {}
            }
        }
    }

    /// Send to this session. Returns false once the session should stop.
    async fn reply(&mut self, package: &WebSocketPackage) -> bool {
        match self.channel.send_package(&mut self.encoder, package).await {
            Ok(_) => true,
            Err(ChannelError::Closed) => false,
            Err(e) => {
                warn!(channel_id = %self.channel.id(), error = %e, "Reply failed");
                self.channel.close(e.close_reason()).await;
                false
            }
        }
    }

    async fn broadcast(&mut self, package: &WebSocketPackage) -> bool {
        let mut frame = BytesMut::new();
        if let Err(e) = self.encoder.encode(&mut frame, package) {
            warn!(channel_id = %self.channel.id(), error = %e, "Broadcast encoding failed");
            self.channel.close(CloseReason::ApplicationError).await;
            return false;
        }
        let delivered = self.registry.broadcast(&frame);
        trace!(channel_id = %self.channel.id(), delivered, "Broadcast sent");
        true
    }
}
