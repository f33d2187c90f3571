//! Live session registry.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::channel::{ChannelError, CloseReason, PipeChannel};
use crate::net::Transport;
use crate::websocket::WebSocketFilter;

type Channel<T> = PipeChannel<T, WebSocketFilter>;

/// Sessions that completed the handshake, keyed by session id.
///
/// Cloning is cheap; clones share the same map.
pub struct SessionRegistry<T> {
    sessions: Arc<DashMap<Uuid, Channel<T>>>,
}

impl<T> Clone for SessionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Transport> SessionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. It is removed again when the guard drops.
    pub fn register(&self, id: Uuid, channel: Channel<T>) -> Registration<T> {
        self.sessions.insert(id, channel);
        tracing::debug!(session_id = %id, sessions = self.sessions.len(), "Session registered");
        Registration {
            sessions: Arc::clone(&self.sessions),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of the open channels. No map lock is held afterwards.
    pub fn channels(&self) -> Vec<Channel<T>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Queue an already encoded frame on every session without waiting.
    /// Returns how many sessions accepted it.
    ///
    /// Closed sessions are skipped. A session whose send queue is full has
    /// stopped reading; it is closed instead of stalling the broadcaster.
    pub fn broadcast(&self, frame: &[u8]) -> usize {
        let mut delivered = 0;
        for channel in self.channels() {
            match channel.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(ChannelError::SendQueueFull) => {
                    tracing::warn!(channel_id = %channel.id(), "Closing session that stopped reading");
                    channel.request_close(CloseReason::LocalClosing);
                }
                Err(e) => {
                    tracing::trace!(channel_id = %channel.id(), error = %e, "Broadcast skipped closed channel");
                }
            }
        }
        delivered
    }
}

/// Keeps a session in its registry for as long as it lives.
pub struct Registration<T> {
    sessions: Arc<DashMap<Uuid, Channel<T>>>,
    id: Uuid,
}

impl<T> Registration<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        tracing::debug!(session_id = %self.id, "Session unregistered");
    }
}
