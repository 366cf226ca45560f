//! Watchdog & Lifecycle (C7, §4.7): a per-thread liveness/escalation type
//! plus the process-wide mutexes named in §5 (`mutex_camlst`,
//! `mutex_post`).

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The two atomic flags every long-lived thread exposes (§4.7).
#[derive(Default)]
pub struct ThreadHandle {
    pub handler_running: AtomicBool,
    pub handler_stop: AtomicBool,
}

impl ThreadHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(ThreadHandle::default())
    }

    pub fn mark_started(&self) {
        self.handler_running.store(true, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.handler_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.handler_running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.handler_stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.handler_stop.load(Ordering::SeqCst)
    }

    pub fn clear_stop(&self) {
        self.handler_stop.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    CleanExit,
    KilledAfterGrace,
    TerminatedProcess,
}

/// Escalation sequence described in §4.7. `poll` is injected so tests can
/// run it without real sleeps; production callers pass
/// `std::thread::sleep`.
pub struct Watchdog {
    pub watchdog_tmo: Duration,
    pub watchdog_kill: Duration,
}

impl Watchdog {
    pub fn new(watchdog_tmo: Duration, watchdog_kill: Duration) -> Self {
        Watchdog { watchdog_tmo, watchdog_kill }
    }

    /// Runs the shutdown sequence against `handle`, calling `poll_sleep`
    /// once per second of waiting and `on_escalate`/`on_terminate` when the
    /// corresponding step is reached.
    pub fn shutdown(
        &self,
        handle: &ThreadHandle,
        mut poll_sleep: impl FnMut(Duration),
        mut on_escalate: impl FnMut(),
        mut on_terminate: impl FnMut(),
    ) -> ShutdownOutcome {
        handle.request_stop();
        let start = Instant::now();
        while handle.is_running() && start.elapsed() < self.watchdog_tmo {
            poll_sleep(Duration::from_secs(1));
        }
        if !handle.is_running() {
            return ShutdownOutcome::CleanExit;
        }

        let kill_start = Instant::now();
        while handle.is_running() && kill_start.elapsed() < self.watchdog_kill {
            poll_sleep(Duration::from_secs(1));
        }
        if !handle.is_running() {
            return ShutdownOutcome::CleanExit;
        }

        warn!("watchdog: thread did not exit in time, escalating to cancellation; memory leaks may occur");
        on_escalate();

        if self.watchdog_kill.is_zero() {
            on_terminate();
            return ShutdownOutcome::TerminatedProcess;
        }
        ShutdownOutcome::KilledAfterGrace
    }
}
