// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counting semaphore.
//!
//! Mutex + condvar around a non-negative counter. Handles are reference
//! counted, so a waiter never outlives the state it waits on.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore. Cloning yields another handle to the same counter.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                count: Mutex::new(value),
                available: Condvar::new(),
            }),
        }
    }

    /// Blocks until the counter is positive, then decrements it.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock().unwrap();
        while *count == 0 {
            count = self.inner.available.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Decrements without blocking. Returns `false` if the counter was zero.
    pub fn try_wait(&self) -> bool {
        let mut count = self.inner.count.lock().unwrap();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Like [`Semaphore::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.inner.count.lock().unwrap();
        while *count == 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            count = self.inner.available.wait_timeout(count, remaining).unwrap().0;
        }
        *count -= 1;
        true
    }

    /// Increments the counter and wakes at most one waiter.
    pub fn post(&self) {
        let mut count = self.inner.count.lock().unwrap();
        *count = count.saturating_add(1);
        self.inner.available.notify_one();
    }

    /// Current counter value. Only a snapshot.
    pub fn value(&self) -> u32 {
        *self.inner.count.lock().unwrap()
    }
}
