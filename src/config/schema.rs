//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the WebSocket server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Per-channel buffer and queue limits.
    pub channel: ChannelConfig,

    /// WebSocket protocol policy.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4040").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4040".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Channel engine limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest package a channel will buffer, in bytes. 0 disables the check.
    pub max_package_length: usize,

    /// Bytes reserved for each transport read.
    pub receive_buffer_size: usize,

    /// Encoded chunks queued for the write pump before senders wait.
    pub send_queue_capacity: usize,

    /// Capacity of each pooled payload block.
    pub block_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_package_length: 4 * 1024 * 1024,
            receive_buffer_size: 4 * 1024,
            send_queue_capacity: 64,
            block_size: 4 * 1024,
        }
    }
}

/// What the server does with incoming messages.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Reply to the sender.
    #[default]
    Echo,
    /// Relay to every open session.
    Broadcast,
}

/// WebSocket protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Close connections whose frames are not masked.
    pub require_mask: bool,

    /// Seconds a client has to complete the opening handshake.
    pub handshake_timeout_secs: u64,

    /// Split outgoing data messages into frames of at most this many bytes.
    pub max_fragment_size: Option<usize>,

    /// Sub-protocols the server accepts, in preference order of the client.
    pub sub_protocols: Vec<String>,

    pub mode: SessionMode,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            require_mask: true,
            handshake_timeout_secs: 120,
            max_fragment_size: None,
            sub_protocols: Vec::new(),
            mode: SessionMode::Echo,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
