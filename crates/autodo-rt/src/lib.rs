// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! autodo runtime core.
//!
//! A single-threaded cooperative scheduler that lets script coroutines hand
//! blocking work to OS threads without ever blocking the scheduler thread.
//!
//! Components:
//! - clock: monotonic `hrtime` and `sleep`
//! - semaphore: counting semaphore, thread safe
//! - notify: coalescing cross-thread wake signal
//! - timer: deadline-ordered one-shot and repeating timers
//! - thread: named OS threads, joined at most once
//! - coroutine / scheduler: registry, schedule states, hooks, tick loop
//! - bridge: `BlockingCall` and `FrameLoop` handoff helpers
//! - process: child processes with stdio delivered on the scheduler thread
//! - api: capability and version negotiation
//! - config: `RuntimeConfig` with `AUTODO_*` environment overrides
//!
//! Everything bound to a [`Scheduler`] stays on the thread that created it:
//! `Scheduler` is `!Send`. Only [`Semaphore`], [`Notify`], [`OsThread`] and
//! the clock cross threads.

pub mod api;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod notify;
pub mod process;
pub mod scheduler;
pub mod semaphore;
pub mod thread;
pub mod timer;

pub use api::{negotiate, Api, Capability, Version, VersionError, API_VERSION};
pub use bridge::{BlockingCall, Frame, FrameLoop, Presenter};
pub use config::{ConfigError, RuntimeConfig};
pub use coroutine::{
    Coroutine, CoroutineHandle, CoroutineId, HookToken, Resume, ScheduleState, Status, PANIC_CODE,
};
pub use error::{Result, RuntimeError};
pub use notify::{Notify, NotifyId};
pub use process::{ProcessConfig, ProcessId, StdioEvent, StdioStatus};
pub use scheduler::{Scheduler, SchedulerStats};
pub use semaphore::Semaphore;
pub use thread::OsThread;
pub use timer::{TimerId, Timers};
