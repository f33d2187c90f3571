//! Pooled buffer segments.
//!
//! # Data Flow
//! ```text
//! BufferPool::rent()
//!     → PooledBlock (fixed-capacity, exclusively owned)
//!     → BufferSequence::append_block / extend_from_slice
//!     → handed to a package (ownership moves with the sequence)
//!     → dropped by the consumer → block returns to the pool
//! ```
//!
//! # Design Decisions
//! - Blocks return to the pool on drop, so a block can never be returned twice
//! - A sequence is a `Vec` of segments indexed by position; each segment
//!   remembers its running index for slicing across segment boundaries
//! - Appending one sequence to another moves blocks, never payload bytes

pub mod pool;
pub mod sequence;

pub use pool::{BufferPool, PooledBlock};
pub use sequence::{BufferSequence, Segment};
