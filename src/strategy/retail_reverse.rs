use super::{Strategy, StrategyError};
use crate::types::{ContractTable, Direction, SeatDetail, Signal};

/// Contrarian read of retail brokerage seats: when they all pile into one side,
/// signal the other.
pub struct RetailReverse {
    seats: Vec<String>,
}

impl RetailReverse {
    pub fn new(seats: Vec<String>) -> Self {
        Self { seats }
    }

    /// Changes and positions per configured seat, summed over both roles. Only seats
    /// with a nonzero change are returned, in configured order.
    fn active_seats(&self, table: &ContractTable) -> Vec<SeatDetail> {
        self.seats
            .iter()
            .map(|seat| {
                let mut detail = SeatDetail {
                    seat_name: seat.clone(),
                    long_chg: 0.0,
                    short_chg: 0.0,
                    long_pos: 0.0,
                    short_pos: 0.0,
                };
                for row in &table.rows {
                    if row.long_party_name == *seat {
                        detail.long_chg += row.long_open_interest_change;
                        detail.long_pos += row.long_open_interest;
                    }
                    if row.short_party_name == *seat {
                        detail.short_chg += row.short_open_interest_change;
                        detail.short_pos += row.short_open_interest;
                    }
                }
                detail
            })
            .filter(|d| d.long_chg != 0.0 || d.short_chg != 0.0)
            .collect()
    }
}

fn ratio(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total
    } else {
        0.0
    }
}

impl Strategy for RetailReverse {
    fn name(&self) -> &'static str {
        "retail_reverse"
    }

    fn analyze(&self, table: &ContractTable) -> Result<Signal, StrategyError> {
        let details = self.active_seats(table);
        if details.is_empty() {
            return Err(StrategyError::NoData(
                "no position change from retail seats".to_string(),
            ));
        }

        let id = table.contract_id();
        let long_chg: f64 = details.iter().map(|d| d.long_chg).sum();
        let short_chg: f64 = details.iter().map(|d| d.short_chg).sum();

        let signal = if details.iter().all(|d| d.long_chg > 0.0 && d.short_chg <= 0.0) {
            let share = ratio(details.iter().map(|d| d.long_pos).sum(), table.total_long);
            Signal::computed(
                self.name(),
                &id,
                Direction::Short,
                share,
                format!(
                    "retail seats increased longs by {long_chg}, holding {:.2}% of long open interest",
                    share * 100.0
                ),
            )
        } else if details.iter().all(|d| d.short_chg > 0.0 && d.long_chg <= 0.0) {
            let share = ratio(details.iter().map(|d| d.short_pos).sum(), table.total_short);
            Signal::computed(
                self.name(),
                &id,
                Direction::Long,
                share,
                format!(
                    "retail seats increased shorts by {short_chg}, holding {:.2}% of short open interest",
                    share * 100.0
                ),
            )
        } else {
            Signal::computed(
                self.name(),
                &id,
                Direction::Neutral,
                0.0,
                format!("retail seats mixed: long change {long_chg:+}, short change {short_chg:+}"),
            )
        };

        Ok(signal.with_seat_details(details))
    }
}
