// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Monotonic clock.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds since an arbitrary point in the past.
///
/// Monotonic and unrelated to wall-clock time. Safe from any thread.
pub fn hrtime() -> u64 {
    u64::try_from(epoch().elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Blocks the calling thread. Never call this on the scheduler thread.
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}
