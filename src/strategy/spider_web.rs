use super::{Strategy, StrategyError};
use crate::types::{ContractTable, Direction, Signal};

/// Informed/uninformed split. Seats carrying a large position relative to their
/// volume are "informed"; the signal is how much more long-biased they are than the rest.
pub struct SpiderWeb {
    informed_ratio: f64,
}

impl SpiderWeb {
    pub fn new(informed_ratio: f64) -> Self {
        Self { informed_ratio }
    }
}

struct Seat {
    stat: f64,
    long: f64,
    short: f64,
}

/// Mean of `(long - short) / (long + short)` over seats with a nonzero book, with the
/// number of seats that contributed. Running form keeps identical inputs exact.
fn idx_mean(seats: &[Seat]) -> Option<(f64, usize)> {
    let mut mean = 0.0;
    let mut n = 0usize;
    for seat in seats {
        let book = seat.long + seat.short;
        if book == 0.0 {
            continue;
        }
        let idx = (seat.long - seat.short) / book;
        if !idx.is_finite() {
            continue;
        }
        mean += (idx - mean) / (n + 1) as f64;
        n += 1;
    }
    (n > 0).then_some((mean, n))
}

impl Strategy for SpiderWeb {
    fn name(&self) -> &'static str {
        "spider_web"
    }

    fn analyze(&self, table: &ContractTable) -> Result<Signal, StrategyError> {
        let mut seats: Vec<Seat> = table
            .rows
            .iter()
            .filter(|r| r.volume > 0.0 && r.volume.is_finite())
            .map(|r| Seat {
                stat: (r.long_open_interest + r.short_open_interest) / r.volume,
                long: r.long_open_interest,
                short: r.short_open_interest,
            })
            .collect();
        if seats.is_empty() {
            return Err(StrategyError::NoData("no eligible seats".to_string()));
        }

        seats.sort_by(|a, b| b.stat.total_cmp(&a.stat));
        let split = (self.informed_ratio * seats.len() as f64).floor() as usize;
        let (informed, uninformed) = seats.split_at(split.min(seats.len()));

        let (Some((informed_mean, k)), Some((uninformed_mean, m))) =
            (idx_mean(informed), idx_mean(uninformed))
        else {
            return Err(StrategyError::Degenerate(format!(
                "cannot compare groups: {} informed and {} uninformed seats, none may have an open book",
                informed.len(),
                uninformed.len()
            )));
        };

        let msd = informed_mean - uninformed_mean;
        let direction = if msd > 0.0 {
            Direction::Long
        } else if msd < 0.0 {
            Direction::Short
        } else {
            Direction::Neutral
        };

        Ok(Signal::computed(
            self.name(),
            &table.contract_id(),
            direction,
            msd.abs(),
            format!(
                "informed bias {informed_mean:.4} ({k} seats) vs uninformed {uninformed_mean:.4} ({m} seats), MSD {msd:+.4}"
            ),
        ))
    }
}
