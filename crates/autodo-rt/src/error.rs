// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime error type.

use std::io;

use thiserror::Error;

use crate::api::VersionError;
use crate::coroutine::{CoroutineHandle, CoroutineId, HookToken};
use crate::notify::NotifyId;
use crate::process::ProcessId;
use crate::timer::TimerId;

/// Errors returned by scheduler-bound and thread operations.
///
/// Container contract violations are not here: those panic.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("coroutine {0} is already registered")]
    AlreadyRegistered(CoroutineHandle),

    #[error("coroutine {0:?} is not registered")]
    NotRegistered(CoroutineId),

    #[error("coroutine {0:?} has already terminated")]
    Terminal(CoroutineId),

    #[error("hook {0:?} is not registered on this coroutine")]
    UnknownHook(HookToken),

    #[error("notify {0:?} does not exist")]
    UnknownNotify(NotifyId),

    #[error("timer {0:?} does not exist")]
    UnknownTimer(TimerId),

    #[error("timer {0:?} was never started")]
    TimerNotStarted(TimerId),

    #[error("process {0:?} does not exist")]
    UnknownProcess(ProcessId),

    #[error("stdin of process {process:?} is closed ({} bytes not written)", .data.len())]
    StdinClosed { process: ProcessId, data: Vec<u8> },

    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("thread {name} panicked: {message}")]
    ThreadPanicked { name: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    IncompatibleVersion(#[from] VersionError),
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
