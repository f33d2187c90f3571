//! Length-prefixed packages.

use bytes::Bytes;

use crate::pipeline::filter::{FilterError, PipelineFilter};
use crate::pipeline::reader::SequenceReader;

/// Reads a big-endian length prefix followed by that many body bytes and
/// yields the body.
#[derive(Debug, Clone)]
pub struct FixedHeaderFilter {
    header_size: usize,
}

impl FixedHeaderFilter {
    /// `header_size` must be 1, 2, 4 or 8.
    pub fn new(header_size: usize) -> Result<Self, FilterError> {
        match header_size {
            1 | 2 | 4 | 8 => Ok(Self { header_size }),
            _ => Err(FilterError::malformed(format!(
                "unsupported length prefix size {header_size}"
            ))),
        }
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    fn body_length(&self, reader: &mut SequenceReader<'_>) -> Option<u64> {
        match self.header_size {
            1 => reader.try_read_u8().map(u64::from),
            2 => reader.try_read_be_u16().map(u64::from),
            4 => reader.try_read_be_u32().map(u64::from),
            _ => reader.try_read_be_u64(),
        }
    }
}

impl PipelineFilter for FixedHeaderFilter {
    type Package = Bytes;

    fn filter(&mut self, reader: &mut SequenceReader<'_>) -> Result<Option<Bytes>, FilterError> {
        let Some(len) = self.body_length(reader) else {
            return Ok(None);
        };
        let len = usize::try_from(len)
            .map_err(|_| FilterError::malformed(format!("body length {len} is too large")))?;

        match reader.try_take(len) {
            Some(body) => Ok(Some(Bytes::copy_from_slice(body))),
            None => {
                reader.rewind(self.header_size);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_whole_package() {
        let mut filter = FixedHeaderFilter::new(2).unwrap();

        let mut reader = SequenceReader::new(&[0x00, 0x03, b'a', b'b']);
        assert!(filter.filter(&mut reader).unwrap().is_none());
        assert_eq!(reader.consumed(), 0);

        let mut reader = SequenceReader::new(&[0x00, 0x03, b'a', b'b', b'c', 0x00]);
        assert_eq!(filter.filter(&mut reader).unwrap().unwrap(), "abc");
        assert_eq!(reader.consumed(), 5);
    }

    #[test]
    fn test_zero_length_body() {
        let mut filter = FixedHeaderFilter::new(1).unwrap();
        let mut reader = SequenceReader::new(&[0x00]);
        assert_eq!(filter.filter(&mut reader).unwrap().unwrap(), "");
    }

    #[test]
    fn test_invalid_header_size() {
        assert!(FixedHeaderFilter::new(3).is_err());
    }
}
