//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, timeouts > 0)
//! - Check that addresses parse
//! - Catch limits that contradict each other
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::websocket::encoder::MIN_FRAGMENT_SIZE;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }

    let channel = &config.channel;
    if channel.receive_buffer_size == 0 {
        errors.push(ValidationError::new(
            "channel.receive_buffer_size",
            "must be greater than 0",
        ));
    }
    if channel.max_package_length > 0 && channel.receive_buffer_size > channel.max_package_length {
        errors.push(ValidationError::new(
            "channel.receive_buffer_size",
            format!(
                "{} exceeds max_package_length {}",
                channel.receive_buffer_size, channel.max_package_length
            ),
        ));
    }
    if channel.send_queue_capacity == 0 {
        errors.push(ValidationError::new(
            "channel.send_queue_capacity",
            "must be greater than 0",
        ));
    }
    if channel.block_size == 0 {
        errors.push(ValidationError::new(
            "channel.block_size",
            "must be greater than 0",
        ));
    }

    let websocket = &config.websocket;
    if websocket.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "websocket.handshake_timeout_secs",
            "must be greater than 0",
        ));
    }
    if let Some(size) = websocket.max_fragment_size {
        if size < MIN_FRAGMENT_SIZE {
            errors.push(ValidationError::new(
                "websocket.max_fragment_size",
                format!("must be at least {MIN_FRAGMENT_SIZE} bytes"),
            ));
        }
    }
    if websocket.sub_protocols.iter().any(|p| p.trim().is_empty() || p.contains(',')) {
        errors.push(ValidationError::new(
            "websocket.sub_protocols",
            "entries must be non-empty tokens without commas",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
