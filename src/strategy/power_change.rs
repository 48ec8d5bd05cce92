use super::{Strategy, StrategyError};
use crate::types::{ContractTable, Direction, Signal};

/// Net position flow: longs adding while shorts cover is bullish, and the reverse bearish.
pub struct PowerChange;

impl Strategy for PowerChange {
    fn name(&self) -> &'static str {
        "power_change"
    }

    fn analyze(&self, table: &ContractTable) -> Result<Signal, StrategyError> {
        let long_chg = table.total_long_change;
        let short_chg = table.total_short_change;

        let (direction, strength, reading) = if long_chg > 0.0 && short_chg < 0.0 {
            (Direction::Long, long_chg.abs(), "longs adding, shorts covering")
        } else if short_chg > 0.0 && long_chg < 0.0 {
            (Direction::Short, short_chg.abs(), "shorts adding, longs covering")
        } else {
            (Direction::Neutral, 0.0, "no one-sided flow")
        };

        Ok(Signal::computed(
            self.name(),
            &table.contract_id(),
            direction,
            strength,
            format!("long change {long_chg:+}, short change {short_chg:+}: {reading}"),
        ))
    }
}
