//! Thread-safe bounded queue shared between pipeline stages.
//!
//! The crate uses [`BoundedQueue`] as the hand-off between stages:
//! - audio buffer thread → audio queue → host audio callback (non-blocking pop)
//! - video buffer thread → video queue → display thread
//!
//! Shutdown is driven by [`BoundedQueue::flush`]: it empties the queue and releases every
//! thread blocked in `push` or `pop`, so a stage can be joined without waiting on a timeout.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Fixed-capacity FIFO with blocking `push`/`pop`.
///
/// ## Design
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - A flush counter is kept *under the same mutex* as the items. Waiters remember the
///   counter when they start waiting and give up once it changes, which is how `flush()`
///   releases them without an out-of-band flag.
/// - A pusher released by `flush()` still inserts its item. The pipeline relies on this:
///   a worker may land exactly one item after the flush, which the final flush drains.
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    flushes: u64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                flushes: 0,
            }),
            cv: Condvar::new(),
        }
    }

    // The audio callback shares this lock, so a panicking holder must not take playback down.
    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current number of queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Returns early (still inserting the item) when a `flush()` happens while waiting.
    pub fn push(&self, item: T) {
        let mut g = self.lock();
        let epoch = g.flushes;
        while g.items.len() >= g.capacity && g.flushes == epoch {
            g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        g.items.push_back(item);
        drop(g);
        self.cv.notify_all();
    }

    /// Append `item` regardless of capacity.
    ///
    /// Only used for the end sentinel during teardown, after the producer was joined.
    pub fn force_push(&self, item: T) {
        let mut g = self.lock();
        g.items.push_back(item);
        drop(g);
        self.cv.notify_all();
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` when a `flush()` released the wait before an item arrived.
    pub fn pop(&self) -> Option<T> {
        let mut g = self.lock();
        let epoch = g.flushes;
        while g.items.is_empty() && g.flushes == epoch {
            g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        let item = g.items.pop_front();
        drop(g);
        if item.is_some() {
            self.cv.notify_all();
        }
        item
    }

    /// Remove the oldest item if one is queued. Never waits on the condition variable.
    pub fn try_pop(&self) -> Option<T> {
        let mut g = self.lock();
        let item = g.items.pop_front();
        drop(g);
        if item.is_some() {
            self.cv.notify_all();
        }
        item
    }

    /// Drop every queued item and wake all blocked pushers and poppers.
    ///
    /// Returns the number of discarded items.
    pub fn flush(&self) -> usize {
        let mut g = self.lock();
        let dropped = g.items.len();
        g.items.clear();
        g.flushes = g.flushes.wrapping_add(1);
        drop(g);
        self.cv.notify_all();
        dropped
    }

    /// Change the capacity.
    ///
    /// Shrinking keeps already queued items; it only affects later pushes.
    /// Growing wakes pushers waiting for room.
    pub fn resize(&self, capacity: usize) {
        let mut g = self.lock();
        if capacity < g.items.len() {
            tracing::debug!(
                capacity,
                queued = g.items.len(),
                "queue shrunk below its current length"
            );
        }
        g.capacity = capacity;
        drop(g);
        self.cv.notify_all();
    }
}
