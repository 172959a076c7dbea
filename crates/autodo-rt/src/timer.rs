// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deadline timers.
//!
//! Active timers sit in an intrusive [`Map`] keyed by `(deadline, seq)`.
//! The sequence number breaks ties between equal deadlines in start order,
//! so the next due timer is always `begin()`.
//!
//! Callbacks run on the scheduler thread during [`Scheduler::tick`]. While a
//! callback runs it is taken out of its slot; restarting the timer from
//! inside the callback with a new callback replaces it.
//!
//! [`Scheduler::tick`]: crate::Scheduler::tick

use std::time::{Duration, Instant};

use autodo_intrusive::{Map, MapEntry, MapLink};
use slab::Slab;

use crate::error::{Result, RuntimeError};
use crate::scheduler::Scheduler;

/// Identity of a timer within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    serial: u64,
}

pub(crate) type TimerCallback = Box<dyn FnMut(&mut Scheduler, TimerId)>;

type Deadline = (Instant, u64);

struct TimerEntry {
    serial: u64,
    key: Deadline,
    link: MapLink,
    repeat: Duration,
    callback: Option<TimerCallback>,
    /// Bumped whenever the callback is replaced.
    generation: u64,
    started: bool,
}

impl MapEntry for TimerEntry {
    type Key = Deadline;

    fn map_link(&self) -> &MapLink {
        &self.link
    }
    fn map_link_mut(&mut self) -> &mut MapLink {
        &mut self.link
    }
    fn map_key(&self) -> &Deadline {
        &self.key
    }
}

/// A callback taken out of a due timer, to be run and handed back.
pub(crate) struct Expired {
    pub(crate) id: TimerId,
    pub(crate) callback: TimerCallback,
    generation: u64,
}

/// The timer set of one scheduler.
pub struct Timers {
    entries: Slab<TimerEntry>,
    queue: Map<Deadline>,
    next_seq: u64,
    next_serial: u64,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            queue: Map::ordered(),
            next_seq: 0,
            next_serial: 0,
        }
    }

    /// Creates an inactive timer.
    pub fn create(&mut self) -> TimerId {
        let serial = self.next_serial;
        self.next_serial += 1;
        let now = Instant::now();
        let index = self.entries.insert(TimerEntry {
            serial,
            key: (now, 0),
            link: MapLink::new(),
            repeat: Duration::ZERO,
            callback: None,
            generation: 0,
            started: false,
        });
        TimerId { index, serial }
    }

    /// Arms the timer. `callback` fires once after `timeout`, then every
    /// `repeat` if `repeat` is non-zero. Restarting an active timer moves
    /// its deadline.
    pub fn start<F>(&mut self, id: TimerId, timeout: Duration, repeat: Duration, callback: F) -> Result<()>
    where
        F: FnMut(&mut Scheduler, TimerId) + 'static,
    {
        self.check(id)?;
        self.unlink(id.index);
        let entry = &mut self.entries[id.index];
        entry.repeat = repeat;
        entry.callback = Some(Box::new(callback));
        entry.generation += 1;
        entry.started = true;
        self.arm(id.index, Instant::now() + timeout);
        Ok(())
    }

    /// Disarms the timer. Stopping an inactive timer is a no-op.
    pub fn stop(&mut self, id: TimerId) -> Result<()> {
        self.check(id)?;
        self.unlink(id.index);
        Ok(())
    }

    /// Restarts a repeating timer one `repeat` interval from now. Does
    /// nothing for a one-shot timer.
    pub fn again(&mut self, id: TimerId) -> Result<()> {
        self.check(id)?;
        let entry = &self.entries[id.index];
        if !entry.started {
            return Err(RuntimeError::TimerNotStarted(id));
        }
        let repeat = entry.repeat;
        if repeat.is_zero() {
            return Ok(());
        }
        self.unlink(id.index);
        self.arm(id.index, Instant::now() + repeat);
        Ok(())
    }

    /// Stops and frees the timer. Its id becomes stale.
    pub fn destroy(&mut self, id: TimerId) -> Result<()> {
        self.check(id)?;
        self.unlink(id.index);
        self.entries.remove(id.index);
        Ok(())
    }

    /// Whether the timer is waiting to fire.
    pub fn is_active(&self, id: TimerId) -> Result<bool> {
        self.check(id)?;
        Ok(self.entries[id.index].link.is_linked())
    }

    /// The repeat interval the timer was last started with.
    pub fn repeat(&self, id: TimerId) -> Result<Duration> {
        self.check(id)?;
        Ok(self.entries[id.index].repeat)
    }

    /// Earliest deadline among active timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .begin(&self.entries)
            .map(|index| self.entries[index].key.0)
    }

    pub fn active_count(&self) -> usize {
        self.queue.len()
    }

    /// Pops the earliest timer due at `now`.
    ///
    /// Repeating timers are re-armed one interval after their previous
    /// deadline, or one interval after `now` if they fell behind, so a
    /// single call never yields the same timer twice for one `now`.
    pub(crate) fn expire(&mut self, now: Instant) -> Option<Expired> {
        loop {
            let index = self.queue.begin(&self.entries)?;
            let deadline = self.entries[index].key.0;
            if deadline > now {
                return None;
            }
            self.queue.erase(&mut self.entries, index);

            let repeat = self.entries[index].repeat;
            if !repeat.is_zero() {
                let mut next = deadline + repeat;
                if next <= now {
                    next = now + repeat;
                }
                self.arm(index, next);
            }

            let entry = &mut self.entries[index];
            let id = TimerId {
                index,
                serial: entry.serial,
            };
            if let Some(callback) = entry.callback.take() {
                return Some(Expired {
                    id,
                    callback,
                    generation: entry.generation,
                });
            }
        }
    }

    /// Puts a callback back after it ran, unless the timer was destroyed or
    /// given a new callback in the meantime.
    pub(crate) fn restore(&mut self, expired: Expired) {
        let Expired {
            id,
            callback,
            generation,
        } = expired;
        if let Some(entry) = self.entries.get_mut(id.index) {
            if entry.serial == id.serial && entry.generation == generation && entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }

    fn check(&self, id: TimerId) -> Result<()> {
        match self.entries.get(id.index) {
            Some(entry) if entry.serial == id.serial => Ok(()),
            _ => Err(RuntimeError::UnknownTimer(id)),
        }
    }

    fn unlink(&mut self, index: usize) {
        if self.entries[index].link.is_linked() {
            self.queue.erase(&mut self.entries, index);
        }
    }

    fn arm(&mut self, index: usize, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries[index].key = (deadline, seq);
        let collision = self.queue.insert(&mut self.entries, index);
        debug_assert!(collision.is_none(), "timer sequence numbers are unique");
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
