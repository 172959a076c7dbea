// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coalescing cross-thread wake signal.
//!
//! A [`Notify`] is created on the scheduler thread with a callback that
//! stays there. Any thread may call [`Notify::send`]; the scheduler then
//! runs the callback once on its own thread. Sends that arrive before the
//! scheduler has picked up the pending wake collapse into that single
//! invocation. The pending flag is cleared just before the callback runs,
//! so a send made during or after the callback schedules another one.
//!
//! Wakes travel through a [`WakeHub`] shared by every notify of one
//! scheduler. The hub doubles as the scheduler's parking spot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::scheduler::Scheduler;
use crate::thread::OsThread;

/// Identity of a notify within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyId {
    pub(crate) index: usize,
    pub(crate) serial: u64,
}

/// Sending half of a notify. Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct Notify {
    shared: Arc<NotifyShared>,
}

struct NotifyShared {
    id: NotifyId,
    pending: AtomicBool,
    closed: AtomicBool,
    hub: Arc<WakeHub>,
}

impl Notify {
    pub(crate) fn new(id: NotifyId, hub: Arc<WakeHub>) -> Self {
        Self {
            shared: Arc::new(NotifyShared {
                id,
                pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                hub,
            }),
        }
    }

    pub fn id(&self) -> NotifyId {
        self.shared.id
    }

    /// Schedules one invocation of the callback on the scheduler thread.
    ///
    /// Ignored once the notify has been destroyed.
    pub fn send(&self) {
        if self.is_closed() {
            warn!(notify = ?self.shared.id, "send on destroyed notify ignored");
            return;
        }
        if !self.shared.pending.swap(true, Ordering::AcqRel) {
            self.shared.hub.wake(self.shared.id);
        }
    }

    /// Whether the scheduler has destroyed this notify.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub(crate) fn clear_pending(&self) {
        self.shared.pending.store(false, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    /// Closes the notify from off the scheduler (typically a `Drop`) and
    /// hands `thread` over for reaping. The scheduler releases the entry on
    /// its next dispatch.
    pub(crate) fn retire(&self, thread: Option<OsThread>) {
        self.close();
        self.shared.hub.retire(self.shared.id, thread);
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notify")
            .field("id", &self.shared.id)
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) type NotifyCallback = Box<dyn FnMut(&mut Scheduler)>;

/// Scheduler-side record of a notify.
pub(crate) struct NotifyEntry {
    pub(crate) handle: Notify,
    pub(crate) callback: Option<NotifyCallback>,
}

/// Queue of pending wakes plus the condvar the scheduler parks on.
#[derive(Debug, Default)]
pub(crate) struct WakeHub {
    queue: Mutex<VecDeque<NotifyId>>,
    woken: Condvar,
    retired: Mutex<Vec<OsThread>>,
}

impl WakeHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wake(&self, id: NotifyId) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(id);
        self.woken.notify_one();
    }

    /// Takes every pending wake in arrival order.
    pub(crate) fn drain(&self) -> VecDeque<NotifyId> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    fn retire(&self, id: NotifyId, thread: Option<OsThread>) {
        self.retired.lock().unwrap().extend(thread);
        self.wake(id);
    }

    /// Threads handed over by retired notifies.
    pub(crate) fn take_retired(&self) -> Vec<OsThread> {
        std::mem::take(&mut *self.retired.lock().unwrap())
    }

    /// Blocks until a wake is queued or `timeout` elapses. Returns whether
    /// wakes are pending.
    pub(crate) fn park(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            queue = self.woken.wait_timeout(queue, remaining).unwrap().0;
        }
        true
    }
}
