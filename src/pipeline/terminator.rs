//! Delimiter-terminated packages.

use bytes::Bytes;

use crate::pipeline::filter::{FilterError, PipelineFilter};
use crate::pipeline::reader::SequenceReader;

/// Yields the bytes before each terminator (`\r\n` by default) and consumes
/// the terminator itself.
#[derive(Debug, Clone)]
pub struct TerminatorFilter {
    terminator: Vec<u8>,
    /// Bytes already searched without finding a terminator.
    scanned: usize,
}

impl TerminatorFilter {
    pub fn new(terminator: impl Into<Vec<u8>>) -> Result<Self, FilterError> {
        let terminator = terminator.into();
        if terminator.is_empty() {
            return Err(FilterError::malformed("terminator must not be empty"));
        }
        Ok(Self {
            terminator,
            scanned: 0,
        })
    }

    /// Line-based filter splitting on `\r\n`.
    pub fn lines() -> Self {
        Self {
            terminator: b"\r\n".to_vec(),
            scanned: 0,
        }
    }
}

impl PipelineFilter for TerminatorFilter {
    type Package = Bytes;

    fn filter(&mut self, reader: &mut SequenceReader<'_>) -> Result<Option<Bytes>, FilterError> {
        // A terminator may straddle the previous search boundary.
        let from = self.scanned.saturating_sub(self.terminator.len() - 1);
        match reader.find(&self.terminator, from) {
            Some(pos) => {
                let body = Bytes::copy_from_slice(reader.take(pos));
                reader.advance(self.terminator.len());
                self.scanned = 0;
                Ok(Some(body))
            }
            None => {
                self.scanned = reader.remaining();
                Ok(None)
            }
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
    }
}
