// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Capability and version negotiation.
//!
//! A consumer names the version it was built against and gets back an
//! [`Api`] table if this runtime can serve it. Compatibility: the major
//! versions must be equal and the requested minor must not exceed ours.
//! Patch levels never affect compatibility.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::clock;
use crate::error::Result;
use crate::semaphore::Semaphore;
use crate::thread::OsThread;

/// Version of the capability table this runtime provides.
pub const API_VERSION: Version = Version::new(1, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a runtime providing `self` can serve a consumer built
    /// against `requested`.
    pub fn serves(self, requested: Version) -> bool {
        self.major == requested.major && requested.minor <= self.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::Malformed(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u16, VersionError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(malformed)
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("runtime provides API {provided}, consumer requested {requested}")]
    Incompatible { requested: Version, provided: Version },

    #[error("malformed version string {0:?}")]
    Malformed(String),
}

/// Primitive families a consumer may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    List,
    Map,
    Semaphore,
    Thread,
    Timer,
    Notify,
    Coroutine,
    Process,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::List,
        Capability::Map,
        Capability::Semaphore,
        Capability::Thread,
        Capability::Timer,
        Capability::Notify,
        Capability::Coroutine,
        Capability::Process,
    ];
}

/// The negotiated capability table.
///
/// Only the thread-safe primitives hang off `Api` directly. Scheduler-bound
/// ones (notify, timers, coroutines, processes) are methods on
/// [`Scheduler`](crate::Scheduler); containers live in `autodo-intrusive`.
#[derive(Debug, Clone, Copy)]
pub struct Api {
    version: Version,
}

impl Api {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        &Capability::ALL
    }

    pub fn supports(&self, capability: Capability) -> bool {
        Capability::ALL.contains(&capability)
    }

    pub fn hrtime(&self) -> u64 {
        clock::hrtime()
    }

    pub fn sleep(&self, duration: Duration) {
        clock::sleep(duration);
    }

    pub fn new_semaphore(&self, value: u32) -> Semaphore {
        Semaphore::new(value)
    }

    /// Spawns a thread named `name`. Consumers without a scheduler at hand
    /// use this; otherwise prefer [`Scheduler::spawn_thread`](crate::Scheduler::spawn_thread).
    pub fn new_thread<F>(&self, name: impl Into<String>, f: F) -> Result<OsThread>
    where
        F: FnOnce() + Send + 'static,
    {
        OsThread::spawn(name, f)
    }

    /// Hardware threads available, or 1 if unknown.
    pub fn parallelism(&self) -> usize {
        thread::available_parallelism().map_or(1, usize::from)
    }
}

/// Hands out the capability table for `requested`.
pub fn negotiate(requested: Version) -> Result<Api> {
    if !API_VERSION.serves(requested) {
        return Err(VersionError::Incompatible {
            requested,
            provided: API_VERSION,
        }
        .into());
    }
    debug!(%requested, provided = %API_VERSION, "api negotiated");
    Ok(Api {
        version: API_VERSION,
    })
}
