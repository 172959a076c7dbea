// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};

use autodo_rt::{CoroutineId, Scheduler};

static INIT_LOGGING: Once = Once::new();

/// Installs a test-writer subscriber filtered by `AUTODO_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("AUTODO_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Runs the scheduler until `done` holds, failing after `limit`.
pub fn run_until(sched: &mut Scheduler, limit: Duration, mut done: impl FnMut(&mut Scheduler) -> bool) {
    let deadline = Instant::now() + limit;
    while !done(sched) {
        assert!(Instant::now() < deadline, "condition not reached within {limit:?}");
        sched.run_once();
    }
}

/// Runs until `id` is terminal or gone.
pub fn run_to_completion(sched: &mut Scheduler, id: CoroutineId) {
    run_until(sched, Duration::from_secs(10), |sched| {
        sched.status(id).map_or(true, |status| status.is_terminal())
    });
}
