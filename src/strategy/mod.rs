pub mod power_change;
pub mod retail_reverse;
pub mod spider_web;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::types::{ContractTable, Direction, Exchange, Signal, SignalStatus};

pub use power_change::PowerChange;
pub use retail_reverse::RetailReverse;
pub use spider_web::SpiderWeb;

/// Why a strategy could not produce a directional reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    /// Nothing in the table qualified as input.
    #[error("{0}")]
    NoData(String),

    /// Inputs existed but a denominator was zero.
    #[error("{0}")]
    Degenerate(String),

    /// Bug or unusable value.
    #[error("{0}")]
    Internal(String),
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, table: &ContractTable) -> Result<Signal, StrategyError>;
}

/// Every strategy's signal for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAnalysis {
    pub contract_id: String,
    pub exchange: Exchange,
    pub label: String,
    pub total_long: f64,
    pub total_short: f64,
    pub total_long_change: f64,
    pub total_short_change: f64,
    pub signals: BTreeMap<String, Signal>,
}

pub struct StrategyEngine {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyEngine {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// power_change, spider_web and retail_reverse, configured from `cfg`.
    pub fn standard(cfg: &Config) -> Self {
        Self::new(vec![
            Box::new(PowerChange),
            Box::new(SpiderWeb::new(cfg.spider_informed_ratio)),
            Box::new(RetailReverse::new(cfg.retail_seats.clone())),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run one strategy. Errors and panics stay inside: they become neutral or
    /// error signals carrying the reason.
    pub fn evaluate(&self, strategy: &dyn Strategy, table: &ContractTable) -> Signal {
        let contract_id = table.contract_id();
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.analyze(table)))
            .unwrap_or_else(|_| Err(StrategyError::Internal("strategy panicked".to_string())))
            .and_then(|signal| {
                if signal.strength.is_finite() && signal.strength >= 0.0 {
                    Ok(signal)
                } else {
                    Err(StrategyError::Internal(format!(
                        "unusable strength {}",
                        signal.strength
                    )))
                }
            });

        let (direction, status, err) = match outcome {
            Ok(signal) => return signal,
            Err(StrategyError::NoData(msg)) => (Direction::Neutral, SignalStatus::NoData, msg),
            Err(StrategyError::Degenerate(msg)) => {
                (Direction::Neutral, SignalStatus::Degenerate, msg)
            }
            Err(StrategyError::Internal(msg)) => {
                error!(strategy = strategy.name(), contract = %contract_id, error = %msg, "Strategy failed");
                (Direction::Error, SignalStatus::Failed, msg)
            }
        };
        debug!(strategy = strategy.name(), contract = %contract_id, status = ?status, "No directional signal");

        Signal {
            strategy: strategy.name().to_string(),
            contract_id,
            direction,
            strength: 0.0,
            rationale: err,
            status,
            seat_details: None,
        }
    }

    pub fn analyze(&self, table: &ContractTable) -> ContractAnalysis {
        let signals = self
            .strategies
            .iter()
            .map(|s| (s.name().to_string(), self.evaluate(s.as_ref(), table)))
            .collect();
        ContractAnalysis {
            contract_id: table.contract_id(),
            exchange: table.exchange,
            label: table.label.clone(),
            total_long: table.total_long,
            total_short: table.total_short,
            total_long_change: table.total_long_change,
            total_short_change: table.total_short_change,
            signals,
        }
    }

    pub fn analyze_all(&self, tables: &[ContractTable]) -> Vec<ContractAnalysis> {
        tables.iter().map(|t| self.analyze(t)).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{ContractTable, Exchange, SeatRow};

    /// (long_party, long_oi, long_chg, short_party, short_oi, short_chg, volume)
    pub type RowSpec<'a> = (&'a str, f64, f64, &'a str, f64, f64, f64);

    pub fn table(rows: &[RowSpec<'_>]) -> ContractTable {
        let rows: Vec<SeatRow> = rows
            .iter()
            .enumerate()
            .map(|(i, (lp, lo, lc, sp, so, sc, vol))| SeatRow {
                rank: i as u32 + 1,
                member_name: lp.to_string(),
                long_party_name: lp.to_string(),
                short_party_name: sp.to_string(),
                volume: *vol,
                long_open_interest: *lo,
                long_open_interest_change: *lc,
                short_open_interest: *so,
                short_open_interest_change: *sc,
            })
            .collect();
        ContractTable {
            exchange: Exchange::Shfe,
            label: "rb2505".to_string(),
            total_long: rows.iter().map(|r| r.long_open_interest).sum(),
            total_short: rows.iter().map(|r| r.short_open_interest).sum(),
            total_long_change: rows.iter().map(|r| r.long_open_interest_change).sum(),
            total_short_change: rows.iter().map(|r| r.short_open_interest_change).sum(),
            rows,
        }
    }
}
