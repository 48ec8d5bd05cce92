use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use super::pacer::RequestPacer;
use super::FetchError;
use crate::config::TOP_SEATS;
use crate::normalize::schema::CANONICAL_COLUMNS;
use crate::types::{Exchange, PricePoint, RawTable};

/// One acquisition tier: fetches every ranking table an exchange published for a date,
/// keyed by contract or variety name. An empty map means "nothing here", not an error.
///
/// Every outbound request must first take a turn from `pacer` for `exchange`.
#[async_trait]
pub trait RankSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
        pacer: &RequestPacer,
    ) -> Result<BTreeMap<String, RawTable>, FetchError>;
}

/// Daily close prices of every listed contract on an exchange.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError>;
}

fn date_param(d: NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

// ---------------------------------------------------------------------------
// Ranking-table tiers (primary and legacy API)
// ---------------------------------------------------------------------------

/// A table in split orientation: `{"columns": [...], "data": [[...], ...]}`.
#[derive(Debug, Deserialize)]
struct SplitTable {
    columns: Vec<String>,
    data: Vec<Vec<serde_json::Value>>,
}

impl From<SplitTable> for RawTable {
    fn from(t: SplitTable) -> Self {
        let rows = t
            .data
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        RawTable::new(t.columns, rows)
    }
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ranking-table API returning `{contract: SplitTable}` for one exchange and date.
/// Serves both the primary and the legacy tier; they differ in host and path.
pub struct TableApiSource {
    name: &'static str,
    client: reqwest::Client,
    url: String,
}

impl TableApiSource {
    pub fn rank_table(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            name: "rank-table",
            client,
            url: format!("{}/rank_table", base_url.trim_end_matches('/')),
        }
    }

    pub fn legacy(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            name: "legacy",
            client,
            url: format!("{}/legacy/rank", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RankSource for TableApiSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
        pacer: &RequestPacer,
    ) -> Result<BTreeMap<String, RawTable>, FetchError> {
        let date = date_param(trade_date);
        pacer.wait_turn(exchange).await;
        let body = self
            .client
            .get(&self.url)
            .query(&[("exchange", exchange.code()), ("date", date.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_table_map(&body)
    }
}

fn parse_table_map(body: &str) -> Result<BTreeMap<String, RawTable>, FetchError> {
    let tables: BTreeMap<String, SplitTable> = serde_json::from_str(body)?;
    Ok(tables
        .into_iter()
        .map(|(name, t)| (name, RawTable::from(t)))
        .collect())
}

// ---------------------------------------------------------------------------
// Seat-level tier: per-variety volume / long / short lists
// ---------------------------------------------------------------------------

/// Varieties queried by the seat-level tier, with display names.
pub fn exchange_symbols(exchange: Exchange) -> &'static [(&'static str, &'static str)] {
    match exchange {
        Exchange::Dce => &[
            ("A", "豆一"),
            ("B", "豆二"),
            ("C", "玉米"),
            ("M", "豆粕"),
            ("Y", "豆油"),
            ("P", "棕榈油"),
            ("I", "铁矿石"),
            ("J", "焦炭"),
            ("JM", "焦煤"),
            ("JD", "鸡蛋"),
            ("L", "塑料"),
            ("PP", "聚丙烯"),
            ("V", "PVC"),
            ("EB", "苯乙烯"),
            ("EG", "乙二醇"),
            ("PG", "液化石油气"),
            ("LH", "生猪"),
        ],
        Exchange::Czce => &[
            ("CF", "棉花"),
            ("CY", "棉纱"),
            ("FG", "玻璃"),
            ("MA", "甲醇"),
            ("OI", "菜籽油"),
            ("RM", "菜粕"),
            ("SA", "纯碱"),
            ("SF", "硅铁"),
            ("SM", "锰硅"),
            ("SR", "白糖"),
            ("TA", "PTA"),
            ("UR", "尿素"),
            ("PF", "短纤"),
        ],
        Exchange::Shfe => &[
            ("AL", "沪铝"),
            ("AU", "黄金"),
            ("AG", "白银"),
            ("BU", "沥青"),
            ("CU", "沪铜"),
            ("FU", "燃料油"),
            ("HC", "热卷"),
            ("NI", "沪镍"),
            ("PB", "沪铅"),
            ("RB", "螺纹钢"),
            ("RU", "橡胶"),
            ("SN", "沪锡"),
            ("SP", "纸浆"),
            ("SS", "不锈钢"),
            ("ZN", "沪锌"),
            ("NR", "20号胶"),
            ("LU", "低硫燃料油"),
        ],
        Exchange::Cffex => &[
            ("IC", "中证500"),
            ("IF", "沪深300"),
            ("IH", "上证50"),
            ("IM", "中证1000"),
            ("T", "十年国债"),
            ("TF", "五年国债"),
            ("TS", "二年国债"),
            ("TL", "三十年国债"),
        ],
        Exchange::Gfex => &[("LC", "碳酸锂"), ("SI", "工业硅")],
    }
}

/// Delivery months a symbol is actively traded in; `None` means the trade month itself.
fn main_months(symbol: &str) -> Option<&'static [u32]> {
    match symbol {
        "IC" | "IF" | "IH" => None,
        "RB" | "HC" => Some(&[1, 5, 10]),
        "CU" | "AL" | "ZN" | "PB" | "NI" | "SN" => Some(&[3, 6, 9, 12]),
        "I" | "J" | "JM" | "M" | "Y" | "P" | "A" | "CF" | "SR" | "TA" => Some(&[1, 5, 9]),
        _ => Some(&[1, 3, 5, 7, 9, 11]),
    }
}

/// Main contract code (`SYMBOL + YY + MM`) for `symbol` as of `trade_date`: the nearest
/// listed month at or after the trade month, rolling into next year when none is left.
pub fn main_contract(symbol: &str, trade_date: NaiveDate) -> String {
    let month = trade_date.month();
    let mut year = trade_date.year();
    let contract_month = match main_months(symbol) {
        None => month,
        Some(months) => match months.iter().copied().find(|m| *m >= month) {
            Some(m) => m,
            None => {
                year += 1;
                months[0]
            }
        },
    };
    format!("{symbol}{:02}{:02}", year.rem_euclid(100), contract_month)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SeatEntry {
    #[serde(default)]
    member: String,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    change: f64,
}

/// The three published lists for one contract.
#[derive(Debug, Default, Deserialize)]
struct HoldLists {
    #[serde(default)]
    volume: Vec<SeatEntry>,
    #[serde(default)]
    long: Vec<SeatEntry>,
    #[serde(default)]
    short: Vec<SeatEntry>,
}

/// Merge the lists by member name into one table with canonical headers. Member order
/// comes from the long list, falling back to the short list, then the volume list.
fn merge_hold_lists(lists: &HoldLists) -> RawTable {
    let order = [&lists.long, &lists.short, &lists.volume]
        .into_iter()
        .find(|l| !l.is_empty())
        .map(|l| l.as_slice())
        .unwrap_or(&[]);

    let by_member = |list: &[SeatEntry]| -> HashMap<String, SeatEntry> {
        list.iter()
            .map(|e| (e.member.trim().to_string(), e.clone()))
            .collect()
    };
    let volume = by_member(&lists.volume);
    let long = by_member(&lists.long);
    let short = by_member(&lists.short);

    let rows = order
        .iter()
        .map(|e| e.member.trim())
        .filter(|m| !m.is_empty())
        .take(TOP_SEATS)
        .enumerate()
        .map(|(i, member)| {
            let vol = volume.get(member).cloned().unwrap_or_default();
            let l = long.get(member).cloned().unwrap_or_default();
            let s = short.get(member).cloned().unwrap_or_default();
            vec![
                (i + 1).to_string(),
                member.to_string(),
                vol.value.to_string(),
                member.to_string(),
                l.value.to_string(),
                l.change.to_string(),
                member.to_string(),
                s.value.to_string(),
                s.change.to_string(),
            ]
        })
        .collect();

    RawTable::new(CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
}

/// Integrated seat-level service: one request per variety of the exchange, for the
/// inferred main contract. Sheets are named `名称(CODE)`.
pub struct SeatLevelSource {
    client: reqwest::Client,
    url: String,
}

impl SeatLevelSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/hold_pos", base_url.trim_end_matches('/')),
        }
    }

    async fn fetch_contract(
        &self,
        contract: &str,
        trade_date: NaiveDate,
    ) -> Result<HoldLists, FetchError> {
        let date = date_param(trade_date);
        let body = self
            .client
            .get(&self.url)
            .query(&[("contract", contract), ("date", date.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RankSource for SeatLevelSource {
    fn name(&self) -> &'static str {
        "seat-level"
    }

    async fn fetch(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
        pacer: &RequestPacer,
    ) -> Result<BTreeMap<String, RawTable>, FetchError> {
        let mut sheets = BTreeMap::new();
        let mut last_err = None;

        for (symbol, name) in exchange_symbols(exchange) {
            let contract = main_contract(symbol, trade_date);
            pacer.wait_turn(exchange).await;
            match self.fetch_contract(&contract, trade_date).await {
                Ok(lists) => {
                    let table = merge_hold_lists(&lists);
                    if !table.is_empty() {
                        sheets.insert(format!("{name}({symbol})"), table);
                    }
                }
                // Rate limits and timeouts concern the whole exchange; let the gateway back off.
                Err(e @ (FetchError::RateLimited(_) | FetchError::Timeout)) => return Err(e),
                Err(e) => {
                    debug!(exchange = %exchange, contract = %contract, error = %e, "Variety fetch failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if sheets.is_empty() => Err(e),
            _ => Ok(sheets),
        }
    }
}

// ---------------------------------------------------------------------------
// Daily prices
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PriceRow {
    symbol: String,
    variety: String,
    close: Option<f64>,
}

pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/daily_prices", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError> {
        let date = date_param(trade_date);
        let body = self
            .client
            .get(&self.url)
            .query(&[("exchange", exchange.code()), ("date", date.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let rows: Vec<PriceRow> = serde_json::from_str(&body)?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                r.close.map(|close| PricePoint {
                    variety: r.variety.trim().to_uppercase(),
                    symbol: r.symbol.trim().to_string(),
                    close,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn main_contract_picks_nearest_listed_month() {
        assert_eq!(main_contract("RB", date(2025, 2, 10)), "RB2505");
        assert_eq!(main_contract("RB", date(2025, 11, 3)), "RB2601");
        assert_eq!(main_contract("CU", date(2025, 6, 2)), "CU2506");
        assert_eq!(main_contract("M", date(2025, 6, 2)), "M2509");
        assert_eq!(main_contract("IF", date(2025, 7, 15)), "IF2507");
        assert_eq!(main_contract("LC", date(2025, 12, 1)), "LC2601");
    }

    #[test]
    fn split_table_cells_become_strings() {
        let body = r#"{"rb2505": {"columns": ["rank", "vol", "long_party_name"],
                       "data": [[1, 1234.5, "中信期货"], [2, null, "国泰君安"]]}}"#;
        let tables = parse_table_map(body).unwrap();
        let t = &tables["rb2505"];
        assert_eq!(t.cell(0, "vol"), "1234.5");
        assert_eq!(t.cell(1, "vol"), "");
        assert_eq!(t.cell(1, "long_party_name"), "国泰君安");
    }

    #[test]
    fn malformed_payload_is_an_upstream_error() {
        let err = parse_table_map("<html>busy</html>").unwrap_err();
        assert_eq!(err.category(), "upstream");
    }

    #[test]
    fn hold_lists_merge_by_member_in_long_order() {
        let entry = |member: &str, value: f64, change: f64| SeatEntry {
            member: member.to_string(),
            value,
            change,
        };
        let lists = HoldLists {
            volume: vec![entry("B", 900.0, 10.0), entry("A", 500.0, -5.0)],
            long: vec![entry("A", 300.0, 20.0), entry("B", 200.0, -4.0)],
            short: vec![entry("B", 150.0, 6.0)],
        };
        let table = merge_hold_lists(&lists);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, "member_name"), "A");
        assert_eq!(table.cell(0, "vol"), "500");
        assert_eq!(table.cell(0, "long_open_interest_chg"), "20");
        assert_eq!(table.cell(0, "short_open_interest"), "0");
        assert_eq!(table.cell(1, "short_open_interest"), "150");
        assert_eq!(table.cell(1, "rank"), "2");
    }

    #[test]
    fn hold_lists_fall_back_to_short_order() {
        let lists = HoldLists {
            short: vec![SeatEntry {
                member: "C".to_string(),
                value: 10.0,
                change: 1.0,
            }],
            ..Default::default()
        };
        let table = merge_hold_lists(&lists);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, "long_open_interest"), "0");
    }

    #[test]
    fn every_exchange_has_symbols() {
        for ex in Exchange::ALL {
            assert!(!exchange_symbols(ex).is_empty());
        }
    }
}
