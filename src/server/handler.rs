//! Application message handlers.

use std::net::SocketAddr;

use uuid::Uuid;

use crate::net::ConnectionId;
use crate::websocket::WebSocketPackage;

/// What a session knows about itself once the handshake is accepted.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub channel_id: ConnectionId,
    pub peer_addr: Option<SocketAddr>,
    /// Request target of the upgrade request.
    pub path: String,
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
}

/// Where a handler's response goes.
#[derive(Debug)]
pub enum Reply {
    None,
    /// Back to the session the message came from.
    Sender(WebSocketPackage),
    /// To every open session, the sender included.
    Broadcast(WebSocketPackage),
}

/// Receives every `Text` and `Binary` message of a session.
///
/// Control frames never reach the handler; the session answers them.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, session: &SessionInfo, message: WebSocketPackage) -> Reply;
}

impl<F> MessageHandler for F
where
    F: Fn(&SessionInfo, WebSocketPackage) -> Reply + Send + Sync + 'static,
{
    fn handle(&self, session: &SessionInfo, message: WebSocketPackage) -> Reply {
        self(session, message)
    }
}

/// Sends every message back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn handle(&self, _session: &SessionInfo, message: WebSocketPackage) -> Reply {
        Reply::Sender(message)
    }
}

/// Relays every message to all open sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastHandler;

impl MessageHandler for BroadcastHandler {
    fn handle(&self, session: &SessionInfo, message: WebSocketPackage) -> Reply {
        tracing::trace!(session_id = %session.id, len = message.len(), "Broadcasting message");
        Reply::Broadcast(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::OpCode;

    fn info() -> SessionInfo {
        SessionInfo {
            id: Uuid::new_v4(),
            channel_id: ConnectionId::new(),
            peer_addr: None,
            path: "/".to_string(),
            protocol: None,
        }
    }

    #[test]
    fn test_echo_returns_message_to_sender() {
        let reply = EchoHandler.handle(&info(), WebSocketPackage::text("hello"));
        match reply {
            Reply::Sender(package) => {
                assert_eq!(package.op_code, OpCode::Text);
                assert_eq!(package.message.as_deref(), Some("hello"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_handler() {
        let reply = BroadcastHandler.handle(&info(), WebSocketPackage::binary(vec![1u8, 2, 3]));
        match reply {
            Reply::Broadcast(package) => assert_eq!(&package.payload()[..], &[1, 2, 3]),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_closure_handler() {
        let upper = |_: &SessionInfo, message: WebSocketPackage| match message.message {
            Some(text) => Reply::Sender(WebSocketPackage::text(text.to_uppercase())),
            None => Reply::None,
        };
        match upper.handle(&info(), WebSocketPackage::text("abc")) {
            Reply::Sender(package) => assert_eq!(package.message.as_deref(), Some("ABC")),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(matches!(
            upper.handle(&info(), WebSocketPackage::binary(vec![0u8])),
            Reply::None
        ));
    }
}
