// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Named OS threads.
//!
//! `OsThread` starts immediately and must be joined exactly once; `join`
//! consumes the handle. There is no detach. Dropping an unjoined handle
//! leaks the thread and logs a warning. Code running on the scheduler
//! thread should hand finished-or-finishing threads to
//! [`Scheduler::reap`](crate::Scheduler::reap) instead of joining.

use std::any::Any;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Handle to a spawned OS thread.
#[derive(Debug)]
pub struct OsThread {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl OsThread {
    /// Spawns `f` on a new thread named `name`.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|source| RuntimeError::Spawn {
                what: format!("thread {name}"),
                source,
            })?;
        debug!(thread = %name, "os thread spawned");
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread body has returned. Joining a finished thread does
    /// not block.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Blocks until the thread body returns.
    ///
    /// A panic in the body is reported as [`RuntimeError::ThreadPanicked`].
    pub fn join(mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|payload| RuntimeError::ThreadPanicked {
            name: self.name.clone(),
            message: panic_message(payload.as_ref()),
        })?;
        debug!(thread = %self.name, "os thread joined");
        Ok(())
    }
}

impl Drop for OsThread {
    fn drop(&mut self) {
        if self.handle.is_some() && !thread::panicking() {
            warn!(thread = %self.name, "os thread handle dropped without join; thread leaked");
        }
    }
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn spawn_and_join() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let t = OsThread::spawn("autodo-test", move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(t.name(), "autodo-test");
        t.join().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn thread_is_named() {
        let (tx, rx) = std::sync::mpsc::channel();
        let t = OsThread::spawn("autodo-named", move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        })
        .unwrap();
        t.join().unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("autodo-named"));
    }

    #[test]
    fn is_finished_after_body_returns() {
        let t = OsThread::spawn("autodo-quick", || {}).unwrap();
        let mut spins = 0;
        while !t.is_finished() && spins < 500 {
            thread::sleep(Duration::from_millis(2));
            spins += 1;
        }
        assert!(t.is_finished());
        t.join().unwrap();
    }

    #[test]
    fn panic_becomes_error() {
        let t = OsThread::spawn("autodo-boom", || panic!("boom")).unwrap();
        match t.join() {
            Err(RuntimeError::ThreadPanicked { name, message }) => {
                assert_eq!(name, "autodo-boom");
                assert!(message.contains("boom"));
            }
            other => panic!("expected ThreadPanicked, got {other:?}"),
        }
    }

    #[test]
    fn panic_message_formats() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
