// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Handing blocking work from a coroutine to an OS thread.
//!
//! The protocol is always the same: the coroutine marks itself Waiting and
//! yields, the thread works and sends a [`Notify`], and the notify callback
//! (on the scheduler thread) marks the coroutine Busy so the next tick
//! resumes it.
//!
//! [`BlockingCall`] runs one closure to completion this way. [`FrameLoop`]
//! keeps a render thread and a coroutine in strict alternation: the thread
//! asks for a frame, the coroutine draws it, the thread presents it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::clock;
use crate::coroutine::{CoroutineId, ScheduleState};
use crate::error::{Result, RuntimeError};
use crate::notify::Notify;
use crate::scheduler::Scheduler;
use crate::semaphore::Semaphore;
use crate::thread::{panic_message, OsThread};

type Slot<T> = Arc<Mutex<Option<Result<T, String>>>>;

/// A closure running on its own thread on behalf of a coroutine.
///
/// ```ignore
/// // inside a coroutine body
/// match call.poll(sched) {
///     Some(result) => Resume::Return(consume(result?)),
///     None => Resume::Yield,
/// }
/// ```
pub struct BlockingCall<T> {
    coroutine: CoroutineId,
    slot: Slot<T>,
    notify: Notify,
    thread: Option<OsThread>,
}

impl<T: Send + 'static> BlockingCall<T> {
    /// Parks `coroutine` in Waiting and runs `f` on a new thread. The
    /// coroutine is made Busy again once `f` returns or panics.
    pub fn spawn<F>(sched: &mut Scheduler, coroutine: CoroutineId, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        sched.set_schedule_state(coroutine, ScheduleState::Waiting)?;
        let notify = sched.create_notify(move |sched| {
            // The coroutine may already be gone.
            let _ = sched.set_schedule_state(coroutine, ScheduleState::Busy);
        });
        let slot: Slot<T> = Arc::default();

        let spawned = {
            let slot = slot.clone();
            let notify = notify.clone();
            sched.spawn_thread("blocking", move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                    .map_err(|payload| panic_message(payload.as_ref()));
                *slot.lock().unwrap() = Some(outcome);
                notify.send();
            })
        };
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                sched.destroy_notify(notify.id())?;
                sched.set_schedule_state(coroutine, ScheduleState::Busy)?;
                return Err(err);
            }
        };
        debug!(coroutine = %coroutine.handle(), thread = thread.name(), "blocking call started");
        Ok(Self {
            coroutine,
            slot,
            notify,
            thread: Some(thread),
        })
    }

    /// Takes the result once the closure is done.
    ///
    /// Returns `None` while it is still running and after the result has
    /// been taken. A panic in the closure comes back as
    /// [`RuntimeError::ThreadPanicked`].
    pub fn poll(&mut self, sched: &mut Scheduler) -> Option<Result<T>> {
        let outcome = self.slot.lock().unwrap().take()?;
        let name = self.release(sched);
        Some(outcome.map_err(|message| RuntimeError::ThreadPanicked { name, message }))
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    pub fn coroutine(&self) -> CoroutineId {
        self.coroutine
    }

    /// Gives up on the result. The thread runs to completion and is reaped
    /// by the scheduler; the coroutine's state is left alone.
    pub fn cancel(mut self, sched: &mut Scheduler) {
        self.release(sched);
    }

    fn release(&mut self, sched: &mut Scheduler) -> String {
        // Dropping after this is a no-op.
        let _ = sched.destroy_notify(self.notify.id());
        match self.thread.take() {
            Some(thread) => {
                let name = thread.name().to_string();
                sched.reap(thread);
                name
            }
            None => String::new(),
        }
    }
}

/// Dropped without `poll` finishing or `cancel` (for example with the body
/// of an aborted coroutine): the notify is retired and the worker thread
/// is reaped by the scheduler once it returns.
impl<T> Drop for BlockingCall<T> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.notify.retire(Some(thread));
        }
    }
}

/// What a coroutine driving a [`FrameLoop`] should do on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// The render thread is waiting for this frame. Draw, then call
    /// [`FrameLoop::end_frame`].
    Ready,
    /// No frame requested yet. Call [`FrameLoop::end_frame`] to wait.
    Pending,
    /// The loop is over. Call [`FrameLoop::finish`].
    Closed,
}

struct FrameShared {
    requested: AtomicBool,
    stopped: AtomicBool,
    drawn: Semaphore,
    frames: AtomicU64,
}

/// Render-thread side of a [`FrameLoop`].
pub struct Presenter {
    shared: Arc<FrameShared>,
    notify: Notify,
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl Presenter {
    /// Requests one frame from the coroutine and blocks until it has been
    /// drawn. Paces calls to the configured interval.
    ///
    /// Returns `false` once the loop has been stopped; the render closure
    /// should return then.
    pub fn present(&mut self) -> bool {
        if self.is_stopped() {
            return false;
        }
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                clock::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());

        self.shared.requested.store(true, Ordering::Release);
        self.notify.send();
        self.shared.drawn.wait();
        let frame = self.shared.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(frame, "frame presented");
        !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

/// A render thread alternating with a coroutine, one frame at a time.
pub struct FrameLoop {
    coroutine: CoroutineId,
    shared: Arc<FrameShared>,
    notify: Notify,
    thread: Option<OsThread>,
    in_frame: bool,
}

impl FrameLoop {
    /// Starts `render` on a new thread, paced by the scheduler's configured
    /// frame rate. `coroutine` is parked in Waiting until the first frame
    /// is requested.
    pub fn start<F>(sched: &mut Scheduler, coroutine: CoroutineId, render: F) -> Result<Self>
    where
        F: FnOnce(&mut Presenter) + Send + 'static,
    {
        let interval = sched.config().frame_interval();
        Self::start_with_interval(sched, coroutine, interval, render)
    }

    /// Like [`FrameLoop::start`] with an explicit pacing interval. `None`
    /// presents as fast as the coroutine draws.
    pub fn start_with_interval<F>(
        sched: &mut Scheduler,
        coroutine: CoroutineId,
        interval: Option<Duration>,
        render: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut Presenter) + Send + 'static,
    {
        sched.set_schedule_state(coroutine, ScheduleState::Waiting)?;
        let notify = sched.create_notify(move |sched| {
            let _ = sched.set_schedule_state(coroutine, ScheduleState::Busy);
        });
        let shared = Arc::new(FrameShared {
            requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            drawn: Semaphore::new(0),
            frames: AtomicU64::new(0),
        });
        let mut presenter = Presenter {
            shared: shared.clone(),
            notify: notify.clone(),
            interval,
            last: None,
        };

        let spawned = sched.spawn_thread("render", move || {
            let panicked = panic::catch_unwind(AssertUnwindSafe(|| render(&mut presenter)));
            presenter.shared.stopped.store(true, Ordering::Release);
            presenter.notify.send();
            if let Err(payload) = panicked {
                panic::resume_unwind(payload);
            }
        });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                sched.destroy_notify(notify.id())?;
                sched.set_schedule_state(coroutine, ScheduleState::Busy)?;
                return Err(err);
            }
        };
        debug!(coroutine = %coroutine.handle(), ?interval, "frame loop started");
        Ok(Self {
            coroutine,
            shared,
            notify,
            thread: Some(thread),
            in_frame: false,
        })
    }

    pub fn coroutine(&self) -> CoroutineId {
        self.coroutine
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Call on every resume of the driving coroutine.
    pub fn begin_frame(&mut self) -> Frame {
        if self.shared.requested.swap(false, Ordering::AcqRel) {
            self.in_frame = true;
            return Frame::Ready;
        }
        if self.shared.stopped.load(Ordering::Acquire) {
            Frame::Closed
        } else {
            Frame::Pending
        }
    }

    /// Hands a drawn frame back to the render thread and parks the
    /// coroutine until the next request. The caller yields afterwards.
    pub fn end_frame(&mut self, sched: &mut Scheduler) -> Result<()> {
        if std::mem::take(&mut self.in_frame) {
            self.shared.drawn.post();
        }
        let stopped = self.shared.stopped.load(Ordering::Acquire);
        if stopped && !self.shared.requested.load(Ordering::Acquire) {
            // Nothing will wake us again; stay Busy so the next resume sees Closed.
            return Ok(());
        }
        sched.set_schedule_state(self.coroutine, ScheduleState::Waiting)
    }

    /// Asks the render thread to stop. Its current or next `present`
    /// returns `false`.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblock a presenter waiting on a frame nobody will draw. A permit
        // left over is never consumed: `present` checks `stopped` first.
        self.in_frame = false;
        self.shared.drawn.post();
        debug!(coroutine = %self.coroutine.handle(), "frame loop stopping");
    }

    /// Stops the loop and releases its notify. The render thread is
    /// reaped by the scheduler once it returns.
    pub fn finish(mut self, sched: &mut Scheduler) -> Result<()> {
        self.stop();
        if let Some(thread) = self.thread.take() {
            sched.reap(thread);
        }
        sched.destroy_notify(self.notify.id())
    }
}

/// Dropped without `finish`: stops the render thread and retires the
/// notify, leaving the thread to the scheduler.
impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop();
            self.notify.retire(Some(thread));
        }
    }
}
