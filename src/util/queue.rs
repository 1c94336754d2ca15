//! Bounded, mutex-protected FIFO queue.
//!
//! Socket state machines run exclusively on the thread driving `serve()`,
//! but the incoming-data and outgoing-datagram queues are also touched by
//! application code from other threads (see the concurrency model in
//! `SPEC_FULL.md`), so they are the one piece of socket state that needs
//! real synchronization.

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug)]
pub struct LockedQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
}

impl<T> LockedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Pushes `value` onto the back of the queue. Returns `false` (and drops
    /// `value`) if the queue was already at capacity.
    pub fn push(&self, value: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.len() >= self.capacity {
            return false;
        }
        guard.push_back(value);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
