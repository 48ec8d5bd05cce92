pub mod schema;

use tracing::warn;

use crate::config::TOP_SEATS;
use crate::types::{ContractTable, Exchange, RawTable, SeatRow};

pub use schema::SchemaMap;
use schema::columns::*;
use schema::REQUIRED_COLUMNS;

/// Normalize one raw ranking table into a [`ContractTable`].
///
/// Returns `None` when a required column is still missing after renaming; the caller
/// skips that contract. Only the first [`TOP_SEATS`] rows are kept, in source order,
/// and the four totals are summed over exactly those rows.
pub fn normalize(
    raw: &RawTable,
    exchange: Exchange,
    label: &str,
    schema: &SchemaMap,
) -> Option<ContractTable> {
    let renamed = RawTable {
        columns: schema.rename(exchange, &raw.columns),
        rows: raw.rows.iter().take(TOP_SEATS).cloned().collect(),
    };

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| renamed.column_index(c).is_none())
        .collect();
    if !missing.is_empty() {
        warn!(
            exchange = %exchange,
            contract = label,
            missing = ?missing,
            "Skipping contract {label}: required columns missing after renaming",
        );
        return None;
    }

    let has_rank = renamed.column_index(RANK).is_some();
    let rows: Vec<SeatRow> = (0..renamed.rows.len())
        .map(|i| {
            let long_party_name = renamed.cell(i, LONG_PARTY).trim().to_string();
            let member_name = match renamed.cell(i, MEMBER_NAME).trim() {
                "" => long_party_name.clone(),
                name => name.to_string(),
            };
            let rank = if has_rank {
                parse_rank(renamed.cell(i, RANK)).unwrap_or(i as u32 + 1)
            } else {
                i as u32 + 1
            };
            SeatRow {
                rank,
                member_name,
                long_party_name,
                short_party_name: renamed.cell(i, SHORT_PARTY).trim().to_string(),
                volume: coerce_number(renamed.cell(i, VOLUME)),
                long_open_interest: coerce_number(renamed.cell(i, LONG_OI)),
                long_open_interest_change: coerce_number(renamed.cell(i, LONG_OI_CHG)),
                short_open_interest: coerce_number(renamed.cell(i, SHORT_OI)),
                short_open_interest_change: coerce_number(renamed.cell(i, SHORT_OI_CHG)),
            }
        })
        .collect();

    Some(ContractTable {
        exchange,
        label: label.to_string(),
        total_long: rows.iter().map(|r| r.long_open_interest).sum(),
        total_short: rows.iter().map(|r| r.short_open_interest).sum(),
        total_long_change: rows.iter().map(|r| r.long_open_interest_change).sum(),
        total_short_change: rows.iter().map(|r| r.short_open_interest_change).sum(),
        rows,
    })
}

/// Strip thousands separators and whitespace, then parse. Blank, unparsable and
/// non-finite cells read as 0.
pub fn coerce_number(cell: &str) -> f64 {
    let cleaned: String = cell
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    match cleaned.to_ascii_lowercase().as_str() {
        "" | "nan" | "none" | "null" | "-" | "--" => 0.0,
        s => s.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0),
    }
}

fn parse_rank(cell: &str) -> Option<u32> {
    let v = coerce_number(cell);
    (v >= 1.0 && v.fract() == 0.0).then_some(v as u32)
}
