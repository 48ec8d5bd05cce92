use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Dce,
    Cffex,
    Czce,
    Shfe,
    Gfex,
}

impl Exchange {
    /// Acquisition order. GFEX goes last: it is the slowest and least reliable source.
    pub const ALL: [Exchange; 5] = [
        Exchange::Dce,
        Exchange::Cffex,
        Exchange::Czce,
        Exchange::Shfe,
        Exchange::Gfex,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Exchange::Dce => "DCE",
            Exchange::Cffex => "CFFEX",
            Exchange::Czce => "CZCE",
            Exchange::Shfe => "SHFE",
            Exchange::Gfex => "GFEX",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Exchange::Dce => "大商所",
            Exchange::Cffex => "中金所",
            Exchange::Czce => "郑商所",
            Exchange::Shfe => "上期所",
            Exchange::Gfex => "广期所",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Exchange::ALL
            .into_iter()
            .find(|ex| ex.code().eq_ignore_ascii_case(s) || ex.display_name() == s)
            .ok_or_else(|| format!("unknown exchange '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Raw and normalized ranking tables
// ---------------------------------------------------------------------------

/// A ranking table exactly as a source delivered it: header names plus string cells.
/// Empty cells are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column name); missing columns and short rows read as "".
    pub fn cell(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|idx| self.rows.get(row).and_then(|r| r.get(idx)))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TableStatus {
    Acquired { tier: String },
    Skipped { reason: String },
}

/// One exchange's workbook for one trade date: a sheet per contract or variety.
/// A skipped exchange still gets a table, with no sheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeTable {
    pub exchange: Exchange,
    pub trade_date: String,
    pub status: TableStatus,
    pub sheets: BTreeMap<String, RawTable>,
}

impl ExchangeTable {
    pub fn acquired(
        exchange: Exchange,
        trade_date: &str,
        tier: &str,
        sheets: BTreeMap<String, RawTable>,
    ) -> Self {
        Self {
            exchange,
            trade_date: trade_date.to_string(),
            status: TableStatus::Acquired {
                tier: tier.to_string(),
            },
            sheets,
        }
    }

    pub fn skipped(exchange: Exchange, trade_date: &str, reason: impl Into<String>) -> Self {
        Self {
            exchange,
            trade_date: trade_date.to_string(),
            status: TableStatus::Skipped {
                reason: reason.into(),
            },
            sheets: BTreeMap::new(),
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self.status, TableStatus::Acquired { .. }) && !self.sheets.is_empty()
    }
}

/// One ranked member's position in one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRow {
    pub rank: u32,
    pub member_name: String,
    pub long_party_name: String,
    pub short_party_name: String,
    pub volume: f64,
    pub long_open_interest: f64,
    pub long_open_interest_change: f64,
    pub short_open_interest: f64,
    pub short_open_interest_change: f64,
}

/// Normalized ranking for one contract (or variety). Totals cover exactly `rows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTable {
    pub exchange: Exchange,
    pub label: String,
    pub rows: Vec<SeatRow>,
    pub total_long: f64,
    pub total_short: f64,
    pub total_long_change: f64,
    pub total_short_change: f64,
}

impl ContractTable {
    /// `EXCHANGE_label`, the identifier signals and resonance work with.
    pub fn contract_id(&self) -> String {
        format!("{}_{}", self.exchange.code(), self.label)
    }
}

/// Close price of one listed contract, input to term-structure classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub variety: String,
    pub symbol: String,
    pub close: f64,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Neutral,
    Error,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
            Direction::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            "neutral" => Ok(Direction::Neutral),
            "error" => Ok(Direction::Error),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// How a signal came about, so consumers can tell "nothing to see" from "could not compute".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// The strategy ran its rule to completion.
    Computed,
    /// Nothing in the table qualified as strategy input.
    NoData,
    /// Inputs existed but a ratio or mean had a zero denominator.
    Degenerate,
    /// The strategy produced an unusable value.
    Failed,
}

/// Per-seat breakdown reported by the retail-reverse strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatDetail {
    pub seat_name: String,
    pub long_chg: f64,
    pub short_chg: f64,
    pub long_pos: f64,
    pub short_pos: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: String,
    pub contract_id: String,
    pub direction: Direction,
    pub strength: f64,
    pub rationale: String,
    pub status: SignalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_details: Option<Vec<SeatDetail>>,
}

impl Signal {
    pub fn computed(
        strategy: &str,
        contract_id: &str,
        direction: Direction,
        strength: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            contract_id: contract_id.to_string(),
            direction,
            strength,
            rationale: rationale.into(),
            status: SignalStatus::Computed,
            seat_details: None,
        }
    }

    pub fn with_seat_details(mut self, details: Vec<SeatDetail>) -> Self {
        self.seat_details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Term structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    /// Strictly decreasing along maturity: near contracts priced above far ones.
    Back,
    /// Strictly increasing along maturity.
    Contango,
    /// Anything else.
    Flat,
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Structure::Back => "back",
            Structure::Contango => "contango",
            Structure::Flat => "flat",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStructure {
    pub variety: String,
    pub structure: Structure,
    pub contracts: Vec<String>,
    pub prices: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Resonance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceEntry {
    pub variety_code: String,
    pub direction: Direction,
    pub strategies: Vec<String>,
    pub contracts: Vec<String>,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_parses_code_and_display_name() {
        assert_eq!("dce".parse::<Exchange>(), Ok(Exchange::Dce));
        assert_eq!(" GFEX ".parse::<Exchange>(), Ok(Exchange::Gfex));
        assert_eq!("郑商所".parse::<Exchange>(), Ok(Exchange::Czce));
        assert!("INE".parse::<Exchange>().is_err());
    }

    #[test]
    fn raw_table_cell_tolerates_short_rows() {
        let table = RawTable::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec!["1".to_string()]],
        );
        assert_eq!(table.cell(0, "a"), "1");
        assert_eq!(table.cell(0, "b"), "");
        assert_eq!(table.cell(3, "a"), "");
        assert_eq!(table.cell(0, "missing"), "");
    }

    #[test]
    fn contract_id_prefixes_exchange_code() {
        let table = ContractTable {
            exchange: Exchange::Shfe,
            label: "rb2505".to_string(),
            rows: Vec::new(),
            total_long: 0.0,
            total_short: 0.0,
            total_long_change: 0.0,
            total_short_change: 0.0,
        };
        assert_eq!(table.contract_id(), "SHFE_rb2505");
    }
}
