//! The pipeline filter contract.

use std::borrow::Cow;
use thiserror::Error;

use crate::pipeline::reader::SequenceReader;

/// Irrecoverable malformed input detected by a filter.
///
/// Any filter error closes the connection with `CloseReason::ProtocolError`.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The input violates the framing rules of the protocol.
    #[error("malformed package: {0}")]
    Malformed(Cow<'static, str>),

    /// A protocol-specific violation reported by a concrete filter.
    #[error(transparent)]
    Protocol(Box<dyn std::error::Error + Send + Sync>),
}

impl FilterError {
    pub fn malformed(reason: impl Into<Cow<'static, str>>) -> Self {
        FilterError::Malformed(reason.into())
    }
}

/// Stateful parser that turns buffered bytes into packages.
///
/// # Contract
/// - `filter` returns `Ok(None)` when the available bytes do not complete
///   a package. Bytes the cursor moved past are committed: the filter has
///   recorded whatever it needed from them.
/// - `filter` returns `Ok(Some(package))` with the cursor exactly past the
///   package; trailing bytes of the next package stay unread.
/// - The engine calls `reset` after every package before calling `filter`
///   again.
/// - `next_filter` is polled after every `filter` call. Returning a filter
///   switches the engine to it for the rest of the connection.
/// - `retained` is read after `reset`. Bytes it reports stay counted
///   against the maximum package length.
pub trait PipelineFilter: Send + 'static {
    /// The decoded unit handed to the package consumer.
    type Package: Send + 'static;

    fn filter(
        &mut self,
        reader: &mut SequenceReader<'_>,
    ) -> Result<Option<Self::Package>, FilterError>;

    /// Clear per-package parse state.
    fn reset(&mut self) {}

    /// Input bytes already consumed toward a package that is still being
    /// assembled after another package was returned. Zero for filters that
    /// emit one package at a time.
    fn retained(&self) -> usize {
        0
    }

    /// Take the filter that replaces this one, if a phase switch happened.
    fn next_filter(&mut self) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }
}
