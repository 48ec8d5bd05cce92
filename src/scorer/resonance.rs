use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::RankedSignals;
use crate::types::{Direction, ResonanceEntry};

/// Canonical variety code of a contract id such as `SHFE_rb2505` or `CZCE_PTA(TA)`.
///
/// Takes the text after the last `separator`, keeps ASCII letters and upper-cases them.
/// A trailing `(CODE)` wins over the rest of the name. Ids without letters fall back to
/// the whole id.
pub fn variety_code(contract_id: &str, separator: &str) -> String {
    let tail = match separator {
        "" => contract_id,
        sep => contract_id
            .rsplit_once(sep)
            .map(|(_, tail)| tail)
            .unwrap_or(contract_id),
    };

    let letters = |s: &str| -> String {
        s.chars()
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };

    let bracketed = tail
        .strip_suffix(')')
        .and_then(|s| s.rsplit_once('('))
        .map(|(_, inner)| letters(inner))
        .filter(|code| !code.is_empty());

    let code = bracketed.unwrap_or_else(|| letters(tail));
    if code.is_empty() {
        return contract_id.to_string();
    }
    canonical_override(code)
}

/// PTA keeps its own name; any longer code starting with TA is TA.
fn canonical_override(code: String) -> String {
    if code == "PTA" {
        code
    } else if code.starts_with("TA") && code.len() > 2 {
        "TA".to_string()
    } else {
        code
    }
}

/// Variety codes flagged by two or more strategies, per direction, keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResonanceReport {
    pub long: BTreeMap<String, ResonanceEntry>,
    pub short: BTreeMap<String, ResonanceEntry>,
}

impl ResonanceReport {
    pub fn entries(&self, direction: Direction) -> Option<&BTreeMap<String, ResonanceEntry>> {
        match direction {
            Direction::Long => Some(&self.long),
            Direction::Short => Some(&self.short),
            _ => None,
        }
    }

    /// Entries strongest first: most strategies, then variety code.
    pub fn ranked(&self, direction: Direction) -> Vec<&ResonanceEntry> {
        let mut entries: Vec<&ResonanceEntry> = self
            .entries(direction)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.variety_code.cmp(&b.variety_code)));
        entries
    }
}

/// Count, per direction, how many distinct strategies have each variety in their top list.
pub fn resonance(
    ranked: &BTreeMap<String, RankedSignals>,
    separator: &str,
    min_strategies: usize,
) -> ResonanceReport {
    let collect = |direction: Direction| -> BTreeMap<String, ResonanceEntry> {
        let mut tally: BTreeMap<String, ResonanceEntry> = BTreeMap::new();
        for (strategy, lists) in ranked {
            let signals = match direction {
                Direction::Long => &lists.long,
                _ => &lists.short,
            };
            for signal in signals {
                let code = variety_code(&signal.contract_id, separator);
                let entry = tally.entry(code.clone()).or_insert_with(|| ResonanceEntry {
                    variety_code: code,
                    direction,
                    strategies: Vec::new(),
                    contracts: Vec::new(),
                    count: 0,
                });
                if !entry.strategies.contains(strategy) {
                    entry.strategies.push(strategy.clone());
                    entry.count = entry.strategies.len();
                }
                if !entry.contracts.contains(&signal.contract_id) {
                    entry.contracts.push(signal.contract_id.clone());
                }
            }
        }
        tally.retain(|_, e| e.count >= min_strategies);
        tally
    };

    ResonanceReport {
        long: collect(Direction::Long),
        short: collect(Direction::Short),
    }
}
