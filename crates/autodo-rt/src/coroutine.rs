// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine registry.
//!
//! Each registered coroutine gets a wrapper holding its status, result
//! count, hook chain and body. Wrappers live in a slab and are indexed by
//! native handle through an intrusive red-black map; Busy wrappers are
//! linked into an intrusive ready list.
//!
//! ```text
//!   register ──▶ Busy ◀──────▶ Waiting
//!                 │  set_schedule_state
//!     resume ─────┤
//!                 ├──▶ Finished        (Resume::Return)
//!                 └──▶ Failed(code)    (Resume::Fail, panic, abort)
//! ```
//!
//! A terminal wrapper is destroyed once its hook chain is empty.

use std::fmt;

use autodo_intrusive::{List, ListEntry, ListLink, Map, MapEntry, MapLink};
use slab::Slab;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::scheduler::Scheduler;

/// Failure code recorded when a coroutine body panics.
pub const PANIC_CODE: i32 = -1;

/// Native handle of a script coroutine. One wrapper per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroutineHandle(pub u64);

impl fmt::Display for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a registered coroutine. Stale once the wrapper is
/// destroyed, even if the same handle is registered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId {
    pub(crate) index: usize,
    pub(crate) serial: u64,
    pub(crate) handle: CoroutineHandle,
}

impl CoroutineId {
    pub fn handle(&self) -> CoroutineHandle {
        self.handle
    }
}

/// Coroutine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Resumed on the next tick.
    Busy,
    /// Skipped until set back to Busy.
    Waiting,
    /// Returned normally.
    Finished,
    /// Failed with a code.
    Failed(i32),
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Failed(_))
    }
}

/// The two states a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleState {
    Busy,
    Waiting,
}

/// What a coroutine body reports after running to its next suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Suspended; stays in its current schedule state.
    Yield,
    /// Finished with this many results.
    Return(usize),
    /// Failed with this code.
    Fail(i32),
}

/// A resumable coroutine body.
///
/// Closures `FnMut(&mut Scheduler, CoroutineId) -> Resume` implement this.
pub trait Coroutine {
    fn resume(&mut self, sched: &mut Scheduler, id: CoroutineId) -> Resume;
}

impl<F> Coroutine for F
where
    F: FnMut(&mut Scheduler, CoroutineId) -> Resume,
{
    fn resume(&mut self, sched: &mut Scheduler, id: CoroutineId) -> Resume {
        self(sched, id)
    }
}

/// Token returned by `hook`, used to unhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken {
    index: usize,
    serial: u64,
}

pub(crate) type HookFn = Box<dyn FnMut(&mut Scheduler, CoroutineId)>;

struct Wrapper {
    handle: CoroutineHandle,
    serial: u64,
    status: Status,
    nresults: usize,
    index_link: MapLink,
    ready_link: ListLink,
    /// Batch epoch the wrapper was queued in, if queued.
    queued: Option<u64>,
    hooks: List,
    body: Option<Box<dyn Coroutine>>,
}

impl MapEntry for Wrapper {
    type Key = CoroutineHandle;

    fn map_link(&self) -> &MapLink {
        &self.index_link
    }
    fn map_link_mut(&mut self) -> &mut MapLink {
        &mut self.index_link
    }
    fn map_key(&self) -> &CoroutineHandle {
        &self.handle
    }
}

impl ListEntry for Wrapper {
    fn list_link(&self) -> &ListLink {
        &self.ready_link
    }
    fn list_link_mut(&mut self) -> &mut ListLink {
        &mut self.ready_link
    }
}

struct Hook {
    link: ListLink,
    owner: usize,
    serial: u64,
    callback: Option<HookFn>,
}

impl ListEntry for Hook {
    fn list_link(&self) -> &ListLink {
        &self.link
    }
    fn list_link_mut(&mut self) -> &mut ListLink {
        &mut self.link
    }
}

/// Wrapper storage, handle index, ready queue and hook chains.
///
/// Ready wrappers queued during the current epoch sit in `ready`. At the
/// start of a batch `ready` is spliced onto `running` and the epoch
/// advances, so anything queued while the batch runs waits for the next
/// one.
pub(crate) struct Registry {
    wrappers: Slab<Wrapper>,
    index: Map<CoroutineHandle>,
    ready: List,
    running: List,
    epoch: u64,
    hooks: Slab<Hook>,
    next_hook_serial: u64,
    next_serial: u64,
    /// Wrapper whose body is currently executing.
    active: Option<usize>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            wrappers: Slab::new(),
            index: Map::ordered(),
            ready: List::new(),
            running: List::new(),
            epoch: 0,
            hooks: Slab::new(),
            next_hook_serial: 0,
            next_serial: 0,
            active: None,
        }
    }

    pub(crate) fn register(&mut self, handle: CoroutineHandle, body: Box<dyn Coroutine>) -> Result<CoroutineId> {
        if self.find(handle).is_some() {
            return Err(RuntimeError::AlreadyRegistered(handle));
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        let index = self.wrappers.insert(Wrapper {
            handle,
            serial,
            status: Status::Busy,
            nresults: 0,
            index_link: MapLink::new(),
            ready_link: ListLink::new(),
            queued: None,
            hooks: List::new(),
            body: Some(body),
        });
        let collision = self.index.insert(&mut self.wrappers, index);
        debug_assert!(collision.is_none());
        self.enqueue(index);
        debug!(coroutine = %handle, "coroutine registered");
        Ok(CoroutineId {
            index,
            serial,
            handle,
        })
    }

    pub(crate) fn find(&self, handle: CoroutineHandle) -> Option<CoroutineId> {
        self.index
            .find(&self.wrappers, &handle)
            .map(|index| self.id_of(index))
    }

    fn id_of(&self, index: usize) -> CoroutineId {
        let w = &self.wrappers[index];
        CoroutineId {
            index,
            serial: w.serial,
            handle: w.handle,
        }
    }

    fn wrapper(&self, id: CoroutineId) -> Result<&Wrapper> {
        match self.wrappers.get(id.index) {
            Some(w) if w.serial == id.serial => Ok(w),
            _ => Err(RuntimeError::NotRegistered(id)),
        }
    }

    fn wrapper_mut(&mut self, id: CoroutineId) -> Result<&mut Wrapper> {
        match self.wrappers.get_mut(id.index) {
            Some(w) if w.serial == id.serial => Ok(w),
            _ => Err(RuntimeError::NotRegistered(id)),
        }
    }

    pub(crate) fn status(&self, id: CoroutineId) -> Result<Status> {
        self.wrapper(id).map(|w| w.status)
    }

    pub(crate) fn nresults(&self, id: CoroutineId) -> Result<usize> {
        self.wrapper(id).map(|w| w.nresults)
    }

    pub(crate) fn set_schedule_state(&mut self, id: CoroutineId, state: ScheduleState) -> Result<()> {
        let w = self.wrapper_mut(id)?;
        match (w.status, state) {
            (status, _) if status.is_terminal() => Err(RuntimeError::Terminal(id)),
            (Status::Busy, ScheduleState::Waiting) => {
                w.status = Status::Waiting;
                self.dequeue(id.index);
                Ok(())
            }
            (Status::Waiting, ScheduleState::Busy) => {
                w.status = Status::Busy;
                // The active wrapper is requeued when its resume returns.
                if self.active != Some(id.index) {
                    self.enqueue(id.index);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Moves the ready queue into the running batch.
    pub(crate) fn begin_batch(&mut self) {
        self.running.migrate(&mut self.wrappers, &mut self.ready);
        self.epoch += 1;
    }

    /// Next wrapper of the running batch, marked active with its body taken.
    pub(crate) fn next_runnable(&mut self) -> Option<(CoroutineId, Box<dyn Coroutine>)> {
        while let Some(index) = self.running.pop_front(&mut self.wrappers) {
            let w = &mut self.wrappers[index];
            w.queued = None;
            debug_assert_eq!(w.status, Status::Busy);
            let Some(body) = w.body.take() else {
                continue;
            };
            self.active = Some(index);
            return Some((self.id_of(index), body));
        }
        None
    }

    /// Applies the outcome of a resume and clears the active mark.
    pub(crate) fn complete(&mut self, id: CoroutineId, body: Box<dyn Coroutine>, outcome: Resume) {
        self.active = None;
        let epoch = self.epoch;
        let Ok(w) = self.wrapper_mut(id) else {
            return;
        };
        if w.status.is_terminal() {
            // Aborted while running; the body is dropped here.
            return;
        }
        match outcome {
            Resume::Yield => {
                w.body = Some(body);
                if w.status == Status::Busy && w.queued.is_none() {
                    w.queued = Some(epoch);
                    self.ready.push_back(&mut self.wrappers, id.index);
                }
            }
            Resume::Return(nresults) => {
                w.status = Status::Finished;
                w.nresults = nresults;
                self.dequeue(id.index);
                debug!(coroutine = %id.handle, nresults, "coroutine finished");
            }
            Resume::Fail(code) => {
                w.status = Status::Failed(code);
                self.dequeue(id.index);
                debug!(coroutine = %id.handle, code, "coroutine failed");
            }
        }
    }

    /// Forces a terminal `Failed(code)` status and drops the body.
    pub(crate) fn abort(&mut self, id: CoroutineId, code: i32) -> Result<()> {
        let w = self.wrapper_mut(id)?;
        if w.status.is_terminal() {
            return Err(RuntimeError::Terminal(id));
        }
        w.status = Status::Failed(code);
        let body = w.body.take();
        self.dequeue(id.index);
        drop(body);
        debug!(coroutine = %id.handle, code, "coroutine aborted");
        Ok(())
    }

    pub(crate) fn hook(&mut self, id: CoroutineId, callback: HookFn) -> Result<HookToken> {
        self.wrapper(id)?;
        let serial = self.next_hook_serial;
        self.next_hook_serial += 1;
        let index = self.hooks.insert(Hook {
            link: ListLink::new(),
            owner: id.index,
            serial,
            callback: Some(callback),
        });
        self.wrappers[id.index].hooks.push_back(&mut self.hooks, index);
        Ok(HookToken { index, serial })
    }

    pub(crate) fn unhook(&mut self, id: CoroutineId, token: HookToken) -> Result<()> {
        self.wrapper(id)?;
        match self.hooks.get(token.index) {
            Some(h) if h.serial == token.serial && h.owner == id.index => {}
            _ => return Err(RuntimeError::UnknownHook(token)),
        }
        self.wrappers[id.index].hooks.erase(&mut self.hooks, token.index);
        self.hooks.remove(token.index);
        Ok(())
    }

    /// Tokens of the hooks registered right now, in registration order.
    pub(crate) fn hook_tokens(&self, id: CoroutineId) -> Vec<HookToken> {
        let Ok(w) = self.wrapper(id) else {
            return Vec::new();
        };
        w.hooks
            .iter(&self.hooks)
            .map(|index| HookToken {
                index,
                serial: self.hooks[index].serial,
            })
            .collect()
    }

    pub(crate) fn take_hook(&mut self, token: HookToken) -> Option<HookFn> {
        match self.hooks.get_mut(token.index) {
            Some(h) if h.serial == token.serial => h.callback.take(),
            _ => None,
        }
    }

    pub(crate) fn restore_hook(&mut self, token: HookToken, callback: HookFn) {
        if let Some(h) = self.hooks.get_mut(token.index) {
            if h.serial == token.serial && h.callback.is_none() {
                h.callback = Some(callback);
            }
        }
    }

    /// Destroys the wrapper if it is terminal, idle and has no hooks left.
    pub(crate) fn collect(&mut self, id: CoroutineId) -> bool {
        if self.active == Some(id.index) {
            return false;
        }
        match self.wrapper(id) {
            Ok(w) if w.status.is_terminal() && w.hooks.is_empty() => {}
            _ => return false,
        }
        self.index.erase(&mut self.wrappers, id.index);
        self.wrappers.remove(id.index);
        debug!(coroutine = %id.handle, "coroutine destroyed");
        true
    }

    pub(crate) fn is_active(&self, id: CoroutineId) -> bool {
        self.active == Some(id.index)
    }

    /// Busy and Waiting wrappers.
    pub(crate) fn live_count(&self) -> usize {
        self.wrappers.iter().filter(|(_, w)| !w.status.is_terminal()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.ready.len() + self.running.len()
    }

    fn enqueue(&mut self, index: usize) {
        let w = &mut self.wrappers[index];
        if w.queued.is_some() {
            return;
        }
        w.queued = Some(self.epoch);
        self.ready.push_back(&mut self.wrappers, index);
    }

    fn dequeue(&mut self, index: usize) {
        let queued = self.wrappers[index].queued.take();
        match queued {
            Some(epoch) if epoch == self.epoch => self.ready.erase(&mut self.wrappers, index),
            Some(_) => self.running.erase(&mut self.wrappers, index),
            None => {}
        }
    }
}
