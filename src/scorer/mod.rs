pub mod resonance;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{outlook_thresholds, Config};
use crate::strategy::ContractAnalysis;
use crate::types::{Direction, Signal};

pub use resonance::ResonanceReport;

const SPIDER_WEB: &str = "spider_web";

/// One strategy's strongest signals per direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedSignals {
    pub long: Vec<Signal>,
    pub short: Vec<Signal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionCounts {
    pub long: usize,
    pub short: usize,
    pub neutral: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_contracts: usize,
    pub long_signals: usize,
    pub short_signals: usize,
    pub per_strategy: BTreeMap<String, DirectionCounts>,
    pub long_resonance: usize,
    pub short_resonance: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketOutlook {
    Bullish,
    CautiousBullish,
    CautiousBearish,
    Bearish,
}

impl MarketOutlook {
    pub fn from_long_ratio(ratio: f64) -> Self {
        if ratio > outlook_thresholds::BULLISH {
            MarketOutlook::Bullish
        } else if ratio > outlook_thresholds::CAUTIOUS_BULLISH {
            MarketOutlook::CautiousBullish
        } else if ratio > outlook_thresholds::CAUTIOUS_BEARISH {
            MarketOutlook::CautiousBearish
        } else {
            MarketOutlook::Bearish
        }
    }
}

impl std::fmt::Display for MarketOutlook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketOutlook::Bullish => "bullish",
            MarketOutlook::CautiousBullish => "cautiously bullish",
            MarketOutlook::CautiousBearish => "cautiously bearish",
            MarketOutlook::Bearish => "bearish",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlookReading {
    pub outlook: MarketOutlook,
    /// Share of contracts with a spider-web long signal.
    pub spider_long_ratio: f64,
}

/// Everything the aggregator derives from one run's analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub ranked: BTreeMap<String, RankedSignals>,
    pub resonance: ResonanceReport,
    pub statistics: Statistics,
    pub outlook: OutlookReading,
}

pub struct SignalAggregator {
    top_n: usize,
    separator: String,
}

impl SignalAggregator {
    pub fn new(top_n: usize, separator: impl Into<String>) -> Self {
        Self {
            top_n,
            separator: separator.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.top_n_signals, cfg.variety_separator.clone())
    }

    /// Top-N long and short signals of `strategy`, strongest first. Ties keep
    /// contract order; neutral and error signals never rank.
    pub fn rank(&self, strategy: &str, analyses: &[ContractAnalysis]) -> RankedSignals {
        let pick = |direction: Direction| -> Vec<Signal> {
            let mut signals: Vec<Signal> = analyses
                .iter()
                .filter_map(|a| a.signals.get(strategy))
                .filter(|s| s.direction == direction)
                .cloned()
                .collect();
            signals.sort_by(|a, b| b.strength.total_cmp(&a.strength));
            signals.truncate(self.top_n);
            signals
        };
        RankedSignals {
            long: pick(Direction::Long),
            short: pick(Direction::Short),
        }
    }

    pub fn aggregate(&self, strategies: &[&str], analyses: &[ContractAnalysis]) -> Aggregation {
        let ranked: BTreeMap<String, RankedSignals> = strategies
            .iter()
            .map(|s| (s.to_string(), self.rank(s, analyses)))
            .collect();
        let resonance = resonance::resonance(&ranked, &self.separator, 2);
        let statistics = statistics(analyses, &resonance);
        Aggregation {
            ranked,
            resonance,
            statistics,
            outlook: outlook(analyses),
        }
    }
}

pub fn statistics(analyses: &[ContractAnalysis], resonance: &ResonanceReport) -> Statistics {
    let mut stats = Statistics {
        total_contracts: analyses.len(),
        long_resonance: resonance.long.len(),
        short_resonance: resonance.short.len(),
        ..Default::default()
    };
    for signal in analyses.iter().flat_map(|a| a.signals.values()) {
        let counts = stats.per_strategy.entry(signal.strategy.clone()).or_default();
        match signal.direction {
            Direction::Long => {
                counts.long += 1;
                stats.long_signals += 1;
            }
            Direction::Short => {
                counts.short += 1;
                stats.short_signals += 1;
            }
            Direction::Neutral => counts.neutral += 1,
            Direction::Error => counts.error += 1,
        }
    }
    stats
}

pub fn outlook(analyses: &[ContractAnalysis]) -> OutlookReading {
    let longs = analyses
        .iter()
        .filter(|a| {
            a.signals
                .get(SPIDER_WEB)
                .is_some_and(|s| s.direction == Direction::Long)
        })
        .count();
    let ratio = if analyses.is_empty() {
        0.0
    } else {
        longs as f64 / analyses.len() as f64
    };
    OutlookReading {
        outlook: MarketOutlook::from_long_ratio(ratio),
        spider_long_ratio: ratio,
    }
}
