//! Single-producer, single-consumer package queue.
//!
//! # Data Flow
//! ```text
//! read pump ──write()──► [segment][segment]... ──read().await──► consumer
//!                 │                                  ▲
//!                 └──────── notify_one() ────────────┘
//! complete() ── end-of-stream marker, read() yields None once drained
//! ```
//!
//! # Design Decisions
//! - Items live in fixed-capacity segments; drained segments are recycled
//!   up to a small spare limit instead of reallocated
//! - Wakeups use `Notify`, whose stored permit covers a write landing between
//!   the consumer's emptiness check and its await
//! - Reading is cancellation safe: an item only leaves the queue when popped

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

/// Items held per segment.
pub const SEGMENT_CAPACITY: usize = 32;

/// Drained segments kept for reuse.
const MAX_SPARE_SEGMENTS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Another consumer is already waiting on this queue.
    #[error("a read is already pending on this queue")]
    ReadPending,
}

struct Segment<T> {
    slots: VecDeque<T>,
    /// Items ever pushed; a segment stops accepting writes at capacity.
    pushed: usize,
}

impl<T> Segment<T> {
    fn new() -> Self {
        Self {
            slots: VecDeque::with_capacity(SEGMENT_CAPACITY),
            pushed: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.pushed == SEGMENT_CAPACITY
    }

    fn is_drained(&self) -> bool {
        self.is_full() && self.slots.is_empty()
    }

    fn recycle(&mut self) {
        self.slots.clear();
        self.pushed = 0;
    }
}

struct QueueInner<T> {
    segments: VecDeque<Segment<T>>,
    spare: Vec<Segment<T>>,
    len: usize,
    completed: bool,
}

impl<T> QueueInner<T> {
    fn push(&mut self, item: T) {
        if self.segments.back().map_or(true, Segment::is_full) {
            let segment = self.spare.pop().unwrap_or_else(Segment::new);
            self.segments.push_back(segment);
        }
        if let Some(tail) = self.segments.back_mut() {
            tail.slots.push_back(item);
            tail.pushed += 1;
            self.len += 1;
        }
    }

    fn pop(&mut self) -> Option<T> {
        let head = self.segments.front_mut()?;
        let item = head.slots.pop_front()?;
        self.len -= 1;

        if head.is_drained() {
            if let Some(mut segment) = self.segments.pop_front() {
                if self.spare.len() < MAX_SPARE_SEGMENTS {
                    segment.recycle();
                    self.spare.push(segment);
                }
            }
        }
        Some(item)
    }
}

/// Queue between the read pump and the package consumer.
pub struct ObjectQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    reading: AtomicBool,
}

impl<T> ObjectQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                segments: VecDeque::new(),
                spare: Vec::new(),
                len: 0,
                completed: false,
            }),
            notify: Notify::new(),
            reading: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item, waking a waiting reader.
    ///
    /// Returns the item back once the queue has been completed.
    pub fn write(&self, item: T) -> Result<(), T> {
        {
            let mut inner = self.lock();
            if inner.completed {
                return Err(item);
            }
            inner.push(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Mark end of stream. Items already queued are still delivered.
    pub fn complete(&self) {
        self.lock().completed = true;
        self.notify.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next item, or `None` once the queue is completed and drained.
    pub async fn read(&self) -> Result<Option<T>, QueueError> {
        if self.reading.swap(true, Ordering::AcqRel) {
            return Err(QueueError::ReadPending);
        }
        let _guard = ReadGuard(&self.reading);

        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.pop() {
                    return Ok(Some(item));
                }
                if inner.completed {
                    // Keep the permit for any later reader.
                    drop(inner);
                    self.notify.notify_one();
                    return Ok(None);
                }
            }
            self.notify.notified().await;
        }
    }
}

impl<T> Default for ObjectQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ReadGuard<'a>(&'a AtomicBool);

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
