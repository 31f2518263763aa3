//! Bounded byte queue shared between producer and consumer tasks.
//!
//! The lock is held only while bytes are copied in or out; callers never do
//! I/O while holding it.  A push either stores the whole batch or nothing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The batch does not fit; the queue is unchanged.
    #[error("queue full: {requested} bytes requested, {free} free")]
    Full { requested: usize, free: usize },
}

/// Fixed-capacity FIFO of bytes.
#[derive(Debug)]
pub struct BridgeQueue {
    name: &'static str,
    capacity: usize,
    buf: Mutex<VecDeque<u8>>,
}

impl BridgeQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends `bytes` as one batch.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] if fewer than `bytes.len()` bytes are free.
    pub fn push(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let mut buf = self.lock();
        let free = self.capacity - buf.len();
        if bytes.len() > free {
            return Err(QueueError::Full {
                requested: bytes.len(),
                free,
            });
        }
        buf.extend(bytes);
        Ok(())
    }

    /// Removes and returns up to `max_len` bytes.  Returns an empty vector when
    /// the queue is empty.
    pub fn pop(&self, max_len: usize) -> Vec<u8> {
        let mut buf = self.lock();
        let n = max_len.min(buf.len());
        buf.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Drops all queued bytes.
    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave the deque half-written, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
