use crate::config::schema::ChannelConfig;

/// Tunables for a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Largest package the read side will buffer; 0 disables the check.
    pub max_package_length: usize,
    /// Bytes reserved for each transport read.
    pub receive_buffer_size: usize,
    /// Encoded chunks that may wait for the write pump before senders block.
    pub send_queue_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_package_length: 4 * 1024 * 1024,
            receive_buffer_size: 4096,
            send_queue_capacity: 64,
        }
    }
}

impl From<&ChannelConfig> for ChannelOptions {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            max_package_length: config.max_package_length,
            receive_buffer_size: config.receive_buffer_size.max(1),
            send_queue_capacity: config.send_queue_capacity.max(1),
        }
    }
}
