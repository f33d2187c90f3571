//! Package encoders.

use bytes::BytesMut;
use thiserror::Error;

/// Failure to serialize an outgoing package.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The package cannot be represented on the wire.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// A control payload went over its size limit.
    #[error("control frame payload of {0} bytes exceeds 125 bytes")]
    ControlFrameTooLarge(usize),
}

/// Serializes packages of type `P` into an output buffer.
pub trait PackageEncoder<P: ?Sized> {
    /// Append the wire form of `package` to `dst`, returning the number of
    /// bytes written.
    fn encode(&mut self, dst: &mut BytesMut, package: &P) -> Result<usize, EncodeError>;
}

/// Writes byte slices unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawEncoder;

impl PackageEncoder<[u8]> for RawEncoder {
    fn encode(&mut self, dst: &mut BytesMut, package: &[u8]) -> Result<usize, EncodeError> {
        dst.extend_from_slice(package);
        Ok(package.len())
    }
}

/// Appends a terminator after every package.
#[derive(Debug, Clone)]
pub struct TerminatorEncoder {
    terminator: Vec<u8>,
}

impl TerminatorEncoder {
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        Self {
            terminator: terminator.into(),
        }
    }

    pub fn lines() -> Self {
        Self::new(b"\r\n".to_vec())
    }
}

impl PackageEncoder<[u8]> for TerminatorEncoder {
    fn encode(&mut self, dst: &mut BytesMut, package: &[u8]) -> Result<usize, EncodeError> {
        dst.extend_from_slice(package);
        dst.extend_from_slice(&self.terminator);
        Ok(package.len() + self.terminator.len())
    }
}
