//! Resumable multi-part package decoding.

use crate::pipeline::filter::FilterError;
use crate::pipeline::reader::SequenceReader;

/// Outcome of processing one part.
#[derive(Debug, PartialEq, Eq)]
pub enum PartStep<R> {
    /// The cursor ran dry before the part was satisfied. Processing resumes
    /// at the same part once more bytes arrive.
    NeedMoreData,
    /// The part is done; continue with the given part.
    Next(R),
    /// The package is complete.
    Complete,
}

/// One stage of a package layout (fixed header, length, key, body...).
///
/// Implementations are usually an enum with one variant per part, carrying
/// whatever progress the part needs to resume after a suspension.
pub trait PartReader: Sized + Send {
    type Package: Send;
    type Context;

    /// The part every package starts with.
    fn initial() -> Self;

    /// A fresh package for the first part to fill in.
    fn create_package(context: &Self::Context) -> Self::Package;

    fn process(
        &mut self,
        context: &Self::Context,
        package: &mut Self::Package,
        reader: &mut SequenceReader<'_>,
    ) -> Result<PartStep<Self>, FilterError>;
}

/// Drives a [`PartReader`] across calls, remembering the active part and
/// the half-built package while waiting for more bytes.
pub struct PartMachine<R: PartReader> {
    part: R,
    package: Option<R::Package>,
}

impl<R: PartReader> PartMachine<R> {
    pub fn new() -> Self {
        Self {
            part: R::initial(),
            package: None,
        }
    }

    /// The part that will run on the next call.
    pub fn current(&self) -> &R {
        &self.part
    }

    /// Run parts until the package completes or the cursor runs dry.
    pub fn run(
        &mut self,
        context: &R::Context,
        reader: &mut SequenceReader<'_>,
    ) -> Result<Option<R::Package>, FilterError> {
        loop {
            let package = self
                .package
                .get_or_insert_with(|| R::create_package(context));

            match self.part.process(context, package, reader)? {
                PartStep::NeedMoreData => return Ok(None),
                PartStep::Next(part) => self.part = part,
                PartStep::Complete => return Ok(self.package.take()),
            }
        }
    }

    /// Go back to the initial part.
    pub fn reset(&mut self) {
        self.part = R::initial();
        self.package = None;
    }
}

impl<R: PartReader> Default for PartMachine<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `[len: u8][body]` decoded as two parts.
    #[derive(Debug, PartialEq, Eq)]
    enum LenPart {
        Len,
        Body(usize),
    }

    impl PartReader for LenPart {
        type Package = Vec<u8>;
        type Context = ();

        fn initial() -> Self {
            LenPart::Len
        }

        fn create_package(_: &()) -> Vec<u8> {
            Vec::new()
        }

        fn process(
            &mut self,
            _: &(),
            package: &mut Vec<u8>,
            reader: &mut SequenceReader<'_>,
        ) -> Result<PartStep<Self>, FilterError> {
            match self {
                LenPart::Len => match reader.try_read_u8() {
                    Some(0) => Ok(PartStep::Complete),
                    Some(n) => Ok(PartStep::Next(LenPart::Body(n as usize))),
                    None => Ok(PartStep::NeedMoreData),
                },
                LenPart::Body(left) => {
                    let chunk = reader.take(*left);
                    package.extend_from_slice(chunk);
                    *left -= chunk.len();
                    if *left == 0 {
                        Ok(PartStep::Complete)
                    } else {
                        Ok(PartStep::NeedMoreData)
                    }
                }
            }
        }
    }

    #[test]
    fn test_resumes_at_same_part() {
        let mut machine: PartMachine<LenPart> = PartMachine::new();

        let mut reader = SequenceReader::new(&[3, b'a']);
        assert_eq!(machine.run(&(), &mut reader).unwrap(), None);
        assert_eq!(reader.consumed(), 2);
        assert_eq!(machine.current(), &LenPart::Body(2));

        let mut reader = SequenceReader::new(b"bcX");
        assert_eq!(machine.run(&(), &mut reader).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(reader.consumed(), 2);

        machine.reset();
        assert_eq!(machine.current(), &LenPart::Len);
    }

    #[test]
    fn test_empty_package() {
        let mut machine: PartMachine<LenPart> = PartMachine::new();
        let mut reader = SequenceReader::new(&[0]);
        assert_eq!(machine.run(&(), &mut reader).unwrap(), Some(Vec::new()));
    }
}
