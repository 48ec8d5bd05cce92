//! Shared health state for the /health endpoint.
//! Updated by main after each analysis run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared run metrics. Written by the runner, read by API.
#[derive(Default)]
pub struct HealthState {
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Millisecond timestamp of the last finished run (0 = none).
    pub last_run_at_ms: AtomicU64,
    pub last_run_ok: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run_at_ms: Option<u64>,
    pub last_run_ok: bool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, ok: bool, at_ms: u64) {
        if ok {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_run_ok.store(ok, Ordering::Relaxed);
        self.last_run_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_run_at_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            status: "ok",
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            last_run_at_ms: (last > 0).then_some(last),
            last_run_ok: self.last_run_ok.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_last_run() {
        let health = HealthState::new();
        assert_eq!(health.snapshot().last_run_at_ms, None);

        health.record_run(false, 1_000);
        health.record_run(true, 2_000);

        let snap = health.snapshot();
        assert_eq!(snap.runs_completed, 1);
        assert_eq!(snap.runs_failed, 1);
        assert_eq!(snap.last_run_at_ms, Some(2_000));
        assert!(snap.last_run_ok);
    }
}
