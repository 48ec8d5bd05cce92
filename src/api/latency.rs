//! In-memory latency histogram for acquisition attempts.
//! The gateway records the wall-clock time of every tier attempt, timeouts included.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. Gateway records, API reads.
/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1ms to one hour, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_ms(&self, ms: u64) {
        if let Ok(mut h) = self.inner.lock() {
            // Sub-millisecond attempts (fakes, cache hits) count as 1ms.
            let _ = h.saturating_record(ms.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.record_ms(ms);
    }

    pub fn summary(&self) -> LatencySummary {
        let empty = LatencySummary {
            samples: 0,
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            max_ms: None,
        };
        let Ok(h) = self.inner.lock() else {
            return empty;
        };
        if h.len() == 0 {
            return empty;
        }
        LatencySummary {
            samples: h.len(),
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
