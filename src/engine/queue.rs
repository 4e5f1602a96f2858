//! Bounded FIFO transport between two adjacent stages.
//!
//! Each edge of the chain has exactly one producer and one consumer
//! thread, but the primitive is safe against spurious wakeups and
//! concurrent access from either side. The contract:
//!
//! - `push` blocks while the queue is full and open; once closed it wakes
//!   and drops the batch.
//! - `poll` never blocks, and keeps draining buffered items after close.
//! - `close` is idempotent, wakes all blocked pushers, and disables
//!   further pushes.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO queue with a close signal.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    space: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an item, blocking while the queue is full. Returns `false`
    /// if the queue was closed and the item dropped.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while inner.buf.len() >= self.capacity && !inner.closed {
            inner = self.space.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
        if inner.closed {
            return false;
        }
        inner.buf.push_back(item);
        true
    }

    /// Remove and return the oldest item, if one is immediately available.
    /// Never blocks. Buffered items remain pollable after close.
    pub fn poll(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let item = inner.buf.pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    /// Close the queue: wake all blocked pushers and disable further
    /// pushes. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        self.space.notify_all();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buf
            .len()
    }

    /// Whether the queue holds no buffered items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(4);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.push(3));
        assert_eq!(q.poll(), Some(1));
        assert_eq!(q.poll(), Some(2));
        assert_eq!(q.poll(), Some(3));
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_poll_empty_returns_none() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_push_blocks_when_full() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(q.push(1));

        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push(2));

        // The pusher must still be blocked while the slot is occupied.
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        assert_eq!(q.poll(), Some(1));
        assert!(handle.join().unwrap());
        assert_eq!(q.poll(), Some(2));
    }

    #[test]
    fn test_close_wakes_blocked_pusher() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(q.push(1));

        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push(2));
        thread::sleep(Duration::from_millis(50));

        q.close();
        // The dropped push reports failure.
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_poll_drains_after_close() {
        let q = BoundedQueue::new(4);
        assert!(q.push(7));
        q.close();
        assert!(!q.push(8));
        assert_eq!(q.poll(), Some(7));
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_close_idempotent() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        q.close();
        q.close();
        assert!(q.is_closed());
    }
}
