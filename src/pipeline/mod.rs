//! Pipeline filters: turning buffered bytes into packages.
//!
//! # Data Flow
//! ```text
//! inbound bytes (owned by the channel read pump)
//!     → SequenceReader (cursor over the unconsumed bytes)
//!     → active PipelineFilter::filter
//!         → Ok(None): needs more data, consumed bytes are committed
//!         → Ok(Some(package)): cursor sits just past the package
//!         → Err(FilterError): connection closes with ProtocolError
//!     → PipelineFilter::next_filter (one-shot phase switch)
//!     → PipelineFilter::reset before the next package
//! ```
//!
//! # Design Decisions
//! - A filter only consumes bytes it has fully interpreted; the engine
//!   keeps everything past the cursor for the next call
//! - Multi-part packages are decoded by a resumable [`PartMachine`] so a
//!   suspended parse continues at the same part
//! - Phase switching returns a replacement filter of the same type, which
//!   keeps the engine free of trait objects

pub mod filter;
pub mod fixed_header;
pub mod part;
pub mod reader;
pub mod terminator;

pub use filter::{FilterError, PipelineFilter};
pub use fixed_header::FixedHeaderFilter;
pub use part::{PartMachine, PartReader, PartStep};
pub use reader::SequenceReader;
pub use terminator::TerminatorFilter;
