//! Segmented byte sequences.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::buffer::pool::{BufferPool, PooledBlock};

/// One block of a [`BufferSequence`] together with its absolute offset.
#[derive(Debug)]
pub struct Segment {
    block: PooledBlock,
    running_index: usize,
}

impl Segment {
    /// Absolute offset of this segment's first byte within the sequence.
    pub fn running_index(&self) -> usize {
        self.running_index
    }

    pub fn as_slice(&self) -> &[u8] {
        self.block.as_slice()
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}

/// An ordered run of pooled blocks read as one logical byte string.
///
/// Only the last segment is ever written to; earlier segments are frozen
/// once a later one exists.
#[derive(Default)]
pub struct BufferSequence {
    segments: Vec<Segment>,
    len: usize,
}

impl BufferSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-segment sequence that does not belong to any pool.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut seq = Self::new();
        if !data.is_empty() {
            seq.append_block(PooledBlock::unpooled(BytesMut::from(data)));
        }
        seq
    }

    /// Total number of bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Iterate the filled bytes of each segment in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::as_slice)
    }

    /// Link a block at the end of the sequence.
    pub fn append_block(&mut self, block: PooledBlock) {
        if block.is_empty() {
            return;
        }
        let len = block.len();
        self.segments.push(Segment {
            block,
            running_index: self.len,
        });
        self.len += len;
    }

    /// Move every segment of `other` to the end of this sequence.
    pub fn append(&mut self, other: BufferSequence) {
        for segment in other.segments {
            self.append_block(segment.block);
        }
    }

    /// Like [`append`](Self::append), but copies `other` into the tail block
    /// when it fits there or is shorter than half a block. Small pieces then
    /// share blocks instead of each holding one, and their own blocks go
    /// back to `pool` right away.
    pub fn append_compact(&mut self, pool: &BufferPool, other: BufferSequence) {
        let spare = self.segments.last().map_or(0, |s| s.block.spare());
        if other.len <= spare || other.len < pool.block_size() / 2 {
            for chunk in other.chunks() {
                self.extend_from_slice(pool, chunk);
            }
        } else {
            self.append(other);
        }
    }

    /// Copy `data` into the tail block, renting new blocks from `pool` as
    /// each one fills up.
    pub fn extend_from_slice(&mut self, pool: &BufferPool, mut data: &[u8]) {
        while !data.is_empty() {
            let n = self.with_tail(pool, |block| block.fill(data));
            data = &data[n..];
        }
    }

    /// Copy `data` while removing a WebSocket mask. `offset` is the position
    /// of `data[0]` within the masked payload.
    pub fn extend_unmasked(
        &mut self,
        pool: &BufferPool,
        mut data: &[u8],
        mask: [u8; 4],
        mut offset: usize,
    ) {
        while !data.is_empty() {
            let n = self.with_tail(pool, |block| block.fill_masked(data, mask, offset));
            data = &data[n..];
            offset += n;
        }
    }

    fn with_tail<F>(&mut self, pool: &BufferPool, fill: F) -> usize
    where
        F: FnOnce(&mut PooledBlock) -> usize,
    {
        let has_room = self
            .segments
            .last()
            .map(|s| s.block.spare() > 0)
            .unwrap_or(false);
        if !has_room {
            self.segments.push(Segment {
                block: pool.rent(),
                running_index: self.len,
            });
        }

        let n = match self.segments.last_mut() {
            Some(tail) => fill(&mut tail.block),
            None => 0,
        };
        self.len += n;
        n
    }

    /// Copy `len` bytes starting at absolute offset `start`.
    ///
    /// Returns `None` when the range runs past the end of the sequence.
    pub fn copy_range(&self, start: usize, len: usize) -> Option<Vec<u8>> {
        let end = start.checked_add(len)?;
        if end > self.len {
            return None;
        }

        let mut out = Vec::with_capacity(len);
        let first = self
            .segments
            .partition_point(|s| s.running_index + s.len() <= start);
        for segment in &self.segments[first..] {
            if segment.running_index >= end {
                break;
            }
            let from = start.saturating_sub(segment.running_index);
            let to = (end - segment.running_index).min(segment.len());
            out.extend_from_slice(&segment.as_slice()[from..to]);
        }
        Some(out)
    }

    /// Copy the whole sequence into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_vec())
    }
}

impl fmt::Debug for BufferSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSequence")
            .field("len", &self.len)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl From<Vec<u8>> for BufferSequence {
    fn from(data: Vec<u8>) -> Self {
        let mut seq = Self::new();
        if !data.is_empty() {
            seq.append_block(PooledBlock::unpooled(BytesMut::from(&data[..])));
        }
        seq
    }
}
