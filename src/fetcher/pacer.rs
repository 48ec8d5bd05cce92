use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::types::Exchange;

#[derive(Debug, Clone, Copy)]
struct Pace {
    interval: Duration,
    next_slot: Instant,
}

/// Enforces a minimum gap between consecutive requests to the same exchange.
/// The gap doubles after every rate limit, up to `max`.
#[derive(Debug)]
pub struct RequestPacer {
    base: Duration,
    max: Duration,
    paces: DashMap<Exchange, Pace>,
}

impl RequestPacer {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            paces: DashMap::new(),
        }
    }

    /// Reserve the next request slot for `exchange` and sleep until it comes up.
    pub async fn wait_turn(&self, exchange: Exchange) {
        let wait = {
            let now = Instant::now();
            let mut pace = self.paces.entry(exchange).or_insert(Pace {
                interval: self.base,
                next_slot: now,
            });
            let slot = pace.next_slot.max(now);
            pace.next_slot = slot + pace.interval;
            slot - now
        };
        if !wait.is_zero() {
            debug!(exchange = %exchange, wait_ms = wait.as_millis() as u64, "Pacing request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Double the gap for `exchange`; returns the new gap.
    pub fn on_rate_limited(&self, exchange: Exchange) -> Duration {
        let now = Instant::now();
        let mut pace = self.paces.entry(exchange).or_insert(Pace {
            interval: self.base,
            next_slot: now,
        });
        pace.interval = (pace.interval * 2).min(self.max);
        pace.interval
    }

    #[cfg(test)]
    pub fn interval(&self, exchange: Exchange) -> Duration {
        self.paces
            .get(&exchange)
            .map(|p| p.interval)
            .unwrap_or(self.base)
    }
}
