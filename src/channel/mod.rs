//! Channel engine.
//!
//! # Data Flow
//! ```text
//! Transport (TCP, duplex, ...)
//!     → pipe.rs read pump (BytesMut inbound buffer)
//!     → PipelineFilter (may switch itself after a package)
//!     → queue.rs ObjectQueue
//!     → PackageReader::next() (single consumer)
//!
//! send() / send_package(PackageEncoder)
//!     → send lock (one encoder at a time)
//!     → bounded mpsc
//!     → pipe.rs write pump
//!     → Transport
//! ```
//!
//! # Design Decisions
//! - Two spawned pumps per channel plus a supervisor that joins both; the
//!   close notification fires only after both have returned
//! - The first recorded close reason wins; later requests only wait
//! - Read-side failures are classified once: ignorable transport errors
//!   close quietly, everything else reaches the error hook
//! - `detach` stops the pumps without closing and hands the transport back
//!   together with bytes no filter consumed

pub mod encoder;
pub mod error;
pub mod options;
pub mod pipe;
pub mod queue;

pub use encoder::{EncodeError, PackageEncoder, RawEncoder, TerminatorEncoder};
pub use error::{ChannelError, ChannelState, CloseReason};
pub use options::ChannelOptions;
pub use pipe::{Detached, PackageReader, PipeChannel};
pub use queue::{ObjectQueue, QueueError};
