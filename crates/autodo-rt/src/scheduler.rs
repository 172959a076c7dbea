// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative scheduler.
//!
//! One scheduler per script environment, confined to the thread that
//! created it. A tick runs, in order:
//!
//! 1. notify callbacks for every wake received since the last tick
//! 2. timer callbacks that are due
//! 3. one resume of every coroutine that was Busy when the batch started,
//!    each followed by its hooks
//! 4. a non-blocking join of finished threads handed to [`Scheduler::reap`]
//!    and of destroyed child processes that have exited
//!
//! Blocking never happens inside a tick. [`Scheduler::run_once`] parks on
//! the wake hub only when no coroutine is ready.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use slab::Slab;
use tracing::{debug, trace, warn};

use crate::config::{ConfigError, RuntimeConfig};
use crate::coroutine::{
    Coroutine, CoroutineHandle, CoroutineId, HookToken, Registry, Resume, ScheduleState, Status, PANIC_CODE,
};
use crate::error::{Result, RuntimeError};
use crate::notify::{Notify, NotifyEntry, NotifyId, WakeHub};
use crate::process::ProcessTable;
use crate::thread::{panic_message, OsThread};
use crate::timer::{TimerId, Timers};

/// Counters and gauges describing a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub resumes: u64,
    /// Busy or Waiting coroutines.
    pub live_coroutines: usize,
    /// Wrappers still registered, terminal ones included.
    pub registered: usize,
    pub ready: usize,
    pub active_timers: usize,
    pub notifies: usize,
    pub pending_threads: usize,
    pub processes: usize,
}

/// Single-threaded coroutine scheduler.
pub struct Scheduler {
    config: RuntimeConfig,
    registry: Registry,
    hub: Arc<WakeHub>,
    notifies: Slab<NotifyEntry>,
    next_notify_serial: u64,
    timers: Timers,
    orphans: Vec<OsThread>,
    pub(crate) processes: ProcessTable,
    ticks: u64,
    resumes: u64,
    _not_send: PhantomData<Rc<()>>,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            hub: Arc::new(WakeHub::new()),
            notifies: Slab::new(),
            next_notify_serial: 0,
            timers: Timers::new(),
            orphans: Vec::new(),
            processes: ProcessTable::new(),
            ticks: 0,
            resumes: 0,
            _not_send: PhantomData,
        }
    }

    /// A scheduler configured from `AUTODO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        RuntimeConfig::from_env().map(Self::new)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // --- registry ---------------------------------------------------------

    /// Registers a coroutine under `handle`. It starts Busy.
    pub fn register<C>(&mut self, handle: CoroutineHandle, body: C) -> Result<CoroutineId>
    where
        C: Coroutine + 'static,
    {
        self.registry.register(handle, Box::new(body))
    }

    pub fn find(&self, handle: CoroutineHandle) -> Option<CoroutineId> {
        self.registry.find(handle)
    }

    pub fn status(&self, id: CoroutineId) -> Result<Status> {
        self.registry.status(id)
    }

    /// Result count of a Finished coroutine.
    pub fn nresults(&self, id: CoroutineId) -> Result<usize> {
        self.registry.nresults(id)
    }

    /// Moves a coroutine between Busy and Waiting.
    pub fn set_schedule_state(&mut self, id: CoroutineId, state: ScheduleState) -> Result<()> {
        self.registry.set_schedule_state(id, state)
    }

    /// Appends a hook that runs after every resume of `id`.
    pub fn hook<F>(&mut self, id: CoroutineId, hook: F) -> Result<HookToken>
    where
        F: FnMut(&mut Scheduler, CoroutineId) + 'static,
    {
        self.registry.hook(id, Box::new(hook))
    }

    /// Removes a hook. Destroys the wrapper if it was the last hook of a
    /// terminal coroutine.
    pub fn unhook(&mut self, id: CoroutineId, token: HookToken) -> Result<()> {
        self.registry.unhook(id, token)?;
        self.registry.collect(id);
        Ok(())
    }

    /// Terminates a coroutine with `Failed(code)` without resuming it.
    ///
    /// Its hooks run once more so they can observe the terminal status.
    pub fn abort(&mut self, id: CoroutineId, code: i32) -> Result<()> {
        self.registry.abort(id, code)?;
        // A coroutine aborting itself gets its hooks run when its resume returns.
        if !self.registry.is_active(id) {
            self.run_hooks(id);
            self.registry.collect(id);
        }
        Ok(())
    }

    // --- notify -----------------------------------------------------------

    /// Creates a notify whose callback runs on this thread.
    pub fn create_notify<F>(&mut self, callback: F) -> Notify
    where
        F: FnMut(&mut Scheduler) + 'static,
    {
        let serial = self.next_notify_serial;
        self.next_notify_serial += 1;
        let entry = self.notifies.vacant_entry();
        let handle = Notify::new(
            NotifyId {
                index: entry.key(),
                serial,
            },
            self.hub.clone(),
        );
        entry.insert(NotifyEntry {
            handle: handle.clone(),
            callback: Some(Box::new(callback)),
        });
        handle
    }

    /// Releases a notify. Later sends on any of its handles are ignored.
    pub fn destroy_notify(&mut self, id: NotifyId) -> Result<()> {
        match self.notifies.get(id.index) {
            Some(entry) if entry.handle.id() == id => {}
            _ => return Err(RuntimeError::UnknownNotify(id)),
        }
        let entry = self.notifies.remove(id.index);
        entry.handle.close();
        Ok(())
    }

    // --- timers -----------------------------------------------------------

    pub fn create_timer(&mut self) -> TimerId {
        self.timers.create()
    }

    pub fn destroy_timer(&mut self, id: TimerId) -> Result<()> {
        self.timers.destroy(id)
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    // --- threads ----------------------------------------------------------

    /// Spawns an OS thread named after the configured prefix and `role`.
    pub fn spawn_thread<F>(&self, role: &str, f: F) -> Result<OsThread>
    where
        F: FnOnce() + Send + 'static,
    {
        OsThread::spawn(self.config.thread_name(role), f)
    }

    /// Hands a thread over to be joined once it has finished.
    pub fn reap(&mut self, thread: OsThread) {
        self.orphans.push(thread);
        self.join_finished();
    }

    // --- driving ----------------------------------------------------------

    /// Runs one tick without blocking. Returns the number of resumes.
    pub fn tick(&mut self) -> usize {
        self.ticks += 1;
        self.dispatch_notifies();
        self.fire_timers(Instant::now());
        let resumed = self.resume_batch();
        self.join_finished();
        self.processes.poll_exited();
        trace!(tick = self.ticks, resumed, "tick");
        resumed
    }

    /// Parks until a wake arrives or a timer is due (bounded by the
    /// configured park timeout) if nothing is ready, then ticks.
    pub fn run_once(&mut self) -> usize {
        if self.registry.ready_count() == 0 {
            let mut timeout = self.config.park_timeout;
            if let Some(deadline) = self.timers.next_deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }
            if !timeout.is_zero() {
                self.hub.park(timeout);
            }
        }
        self.tick()
    }

    /// Ticks until no coroutine is live and no timer is active.
    pub fn run(&mut self) {
        while self.is_alive() {
            self.run_once();
        }
        debug!(ticks = self.ticks, resumes = self.resumes, "scheduler idle");
    }

    /// Whether any coroutine is Busy or Waiting, or any timer is active.
    pub fn is_alive(&self) -> bool {
        self.registry.live_count() > 0 || self.timers.active_count() > 0
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks,
            resumes: self.resumes,
            live_coroutines: self.registry.live_count(),
            registered: self.registry.len(),
            ready: self.registry.ready_count(),
            active_timers: self.timers.active_count(),
            notifies: self.notifies.len(),
            pending_threads: self.orphans.len(),
            processes: self.processes.len(),
        }
    }

    fn dispatch_notifies(&mut self) {
        for id in self.hub.drain() {
            let closed = match self.notifies.get(id.index) {
                Some(entry) if entry.handle.id() == id => entry.handle.is_closed(),
                _ => continue,
            };
            if closed {
                // Retired by its owner's drop.
                self.notifies.remove(id.index);
                continue;
            }
            let entry = &mut self.notifies[id.index];
            entry.handle.clear_pending();
            let Some(mut callback) = entry.callback.take() else {
                continue;
            };
            callback(self);
            if let Some(entry) = self.notifies.get_mut(id.index) {
                if entry.handle.id() == id && entry.callback.is_none() {
                    entry.callback = Some(callback);
                }
            }
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        while let Some(mut expired) = self.timers.expire(now) {
            (expired.callback)(self, expired.id);
            self.timers.restore(expired);
        }
    }

    fn resume_batch(&mut self) -> usize {
        self.registry.begin_batch();
        let limit = self.config.max_tick_batch;
        let mut resumed = 0;
        while limit == 0 || resumed < limit {
            let Some((id, mut body)) = self.registry.next_runnable() else {
                break;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body.resume(self, id)))
                .unwrap_or_else(|payload| {
                    warn!(
                        coroutine = %id.handle(),
                        panic = %panic_message(payload.as_ref()),
                        "coroutine panicked"
                    );
                    Resume::Fail(PANIC_CODE)
                });
            self.registry.complete(id, body, outcome);
            self.resumes += 1;
            resumed += 1;
            self.run_hooks(id);
            self.registry.collect(id);
        }
        resumed
    }

    /// Runs every hook registered on `id` at this moment, in order. Hooks
    /// removed by an earlier hook in the same pass are skipped.
    fn run_hooks(&mut self, id: CoroutineId) {
        for token in self.registry.hook_tokens(id) {
            let Some(mut hook) = self.registry.take_hook(token) else {
                continue;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(self, id))) {
                warn!(
                    coroutine = %id.handle(),
                    panic = %panic_message(payload.as_ref()),
                    "coroutine hook panicked"
                );
            }
            self.registry.restore_hook(token, hook);
        }
    }

    fn join_finished(&mut self) {
        self.orphans.extend(self.hub.take_retired());
        if self.orphans.is_empty() {
            return;
        }
        let (finished, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.orphans).into_iter().partition(OsThread::is_finished);
        self.orphans = pending;
        for thread in finished {
            let name = thread.name().to_string();
            match thread.join() {
                Ok(()) => debug!(thread = %name, "reaped thread"),
                Err(err) => warn!(thread = %name, error = %err, "reaped thread failed"),
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.notifies.drain() {
            entry.handle.close();
        }
        let pumps = self.processes.shutdown();
        self.orphans.extend(pumps);
        // Unfinished threads leak here; `OsThread`'s drop logs each one.
        self.join_finished();
    }
}
