//! Fixed-size block pool.

use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Default block capacity in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of idle blocks kept for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 1024;

#[derive(Debug)]
struct PoolInner {
    block_size: usize,
    max_retained: usize,
    free: Mutex<Vec<BytesMut>>,
    rented: AtomicUsize,
}

/// A shared pool of fixed-capacity byte blocks.
///
/// Cloning the pool is cheap; all clones rent from the same free list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out blocks of `block_size` bytes.
    pub fn new(block_size: usize, max_retained: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                block_size: block_size.max(1),
                max_retained,
                free: Mutex::new(Vec::new()),
                rented: AtomicUsize::new(0),
            }),
        }
    }

    /// Capacity of every block rented from this pool.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Rent an empty block, reusing an idle one when available.
    pub fn rent(&self) -> PooledBlock {
        let reused = self
            .inner
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop());

        let buf = reused.unwrap_or_else(|| BytesMut::with_capacity(self.inner.block_size));
        self.inner.rented.fetch_add(1, Ordering::Relaxed);

        PooledBlock {
            buf,
            capacity: self.inner.block_size,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of blocks currently rented out.
    pub fn rented(&self) -> usize {
        self.inner.rented.load(Ordering::Relaxed)
    }

    /// Number of idle blocks waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, DEFAULT_MAX_RETAINED)
    }
}

/// A byte block rented from a [`BufferPool`].
///
/// The block is returned to its pool when dropped. Blocks built with
/// [`PooledBlock::unpooled`] have no pool and are simply freed.
#[derive(Debug)]
pub struct PooledBlock {
    buf: BytesMut,
    capacity: usize,
    pool: Weak<PoolInner>,
}

impl PooledBlock {
    /// Wrap bytes that do not belong to any pool.
    pub fn unpooled(buf: BytesMut) -> Self {
        let capacity = buf.len();
        Self {
            buf,
            capacity,
            pool: Weak::new(),
        }
    }

    /// Filled bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of filled bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be written before the block is full.
    pub fn spare(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Copy as much of `data` as fits, returning the number of bytes taken.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Like [`fill`](Self::fill) but XORs every byte with `mask`, starting at
    /// mask position `offset`.
    pub fn fill_masked(&mut self, data: &[u8], mask: [u8; 4], offset: usize) -> usize {
        let n = data.len().min(self.spare());
        self.buf.extend(
            data[..n]
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ mask[(offset + i) & 3]),
        );
        n
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        pool.rented.fetch_sub(1, Ordering::Relaxed);

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if buf.capacity() < pool.block_size {
            return;
        }
        let Ok(mut free) = pool.free.lock() else {
            return;
        };
        if free.len() < pool.max_retained {
            free.push(buf);
        }
    }
}
