use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::types::{PricePoint, Structure, TermStructure};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TermStructureError {
    #[error("{variety}: need at least 2 contracts, got {got}")]
    InsufficientData { variety: String, got: usize },

    #[error("{variety}: {contracts} contracts but {prices} prices")]
    LengthMismatch {
        variety: String,
        contracts: usize,
        prices: usize,
    },
}

/// Classify one variety's curve. Contracts must already be in maturity order.
///
/// Strict: a single step against the trend anywhere makes the curve `Flat`.
pub fn classify(
    variety: &str,
    contracts: Vec<String>,
    prices: Vec<f64>,
) -> Result<TermStructure, TermStructureError> {
    if contracts.len() != prices.len() {
        return Err(TermStructureError::LengthMismatch {
            variety: variety.to_string(),
            contracts: contracts.len(),
            prices: prices.len(),
        });
    }
    if prices.len() < 2 {
        return Err(TermStructureError::InsufficientData {
            variety: variety.to_string(),
            got: prices.len(),
        });
    }

    let structure = if prices.windows(2).all(|w| w[0] > w[1]) {
        Structure::Back
    } else if prices.windows(2).all(|w| w[0] < w[1]) {
        Structure::Contango
    } else {
        Structure::Flat
    };

    Ok(TermStructure {
        variety: variety.to_string(),
        structure,
        contracts,
        prices,
    })
}

/// Group points by variety, order each group by symbol and classify it. Points with a
/// non-positive or non-finite close are dropped; varieties left with fewer than two
/// contracts are skipped.
pub fn classify_all(points: &[PricePoint]) -> Vec<TermStructure> {
    let mut by_variety: BTreeMap<&str, Vec<&PricePoint>> = BTreeMap::new();
    for p in points.iter().filter(|p| p.close.is_finite() && p.close > 0.0) {
        by_variety.entry(p.variety.as_str()).or_default().push(p);
    }

    by_variety
        .into_iter()
        .filter_map(|(variety, mut group)| {
            // Symbol order stands in for maturity order.
            group.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            let contracts = group.iter().map(|p| p.symbol.clone()).collect();
            let prices = group.iter().map(|p| p.close).collect();
            match classify(variety, contracts, prices) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    debug!(error = %e, "Skipping term structure");
                    None
                }
            }
        })
        .collect()
}
