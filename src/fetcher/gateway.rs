use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::pacer::RequestPacer;
use super::sources::{HttpPriceSource, PriceSource, RankSource, SeatLevelSource, TableApiSource};
use super::FetchError;
use crate::api::latency::LatencyStats;
use crate::config::{backoff, Config, MAX_REQUEST_SPACING_MS};
use crate::error::{AppError, Result};
use crate::state::TableSink;
use crate::types::{Exchange, ExchangeTable, PricePoint, RawTable};

/// Longest sheet name a workbook accepts.
const SHEET_NAME_MAX_CHARS: usize = 31;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Timeout for GFEX.
    pub slow_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_timeout: Duration,
    pub backoff_rate_limit: Duration,
    pub backoff_connection: Duration,
    pub request_spacing: Duration,
    pub max_request_spacing: Duration,
    pub pool_width: usize,
    pub success_threshold: usize,
}

impl FetchPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.fetch_timeout_secs),
            slow_timeout: Duration::from_secs(cfg.slow_fetch_timeout_secs),
            max_retries: cfg.fetch_max_retries.max(1),
            backoff_base: Duration::from_millis(backoff::BASE_MS),
            backoff_timeout: Duration::from_millis(backoff::TIMEOUT_MS),
            backoff_rate_limit: Duration::from_millis(backoff::RATE_LIMIT_MS),
            backoff_connection: Duration::from_millis(backoff::CONNECTION_MS),
            request_spacing: Duration::from_millis(cfg.request_spacing_ms),
            max_request_spacing: Duration::from_millis(MAX_REQUEST_SPACING_MS),
            pool_width: cfg.fetch_pool_width.max(1),
            success_threshold: cfg.success_threshold,
        }
    }

    pub fn timeout_for(&self, exchange: Exchange) -> Duration {
        match exchange {
            Exchange::Gfex => self.slow_timeout,
            _ => self.timeout,
        }
    }

    /// Delay before retry `attempt` (1-based) after `err`.
    fn backoff(&self, err: &FetchError, attempt: u32) -> Duration {
        let base = self.backoff_base * attempt;
        match err {
            FetchError::Timeout => base + self.backoff_timeout,
            FetchError::RateLimited(_) => base + self.backoff_rate_limit,
            FetchError::Connection(_) => base + self.backoff_connection,
            FetchError::Upstream(_) => base,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStatus {
    Success,
    Partial,
    Failure,
}

impl AcquisitionStatus {
    pub fn from_counts(succeeded: usize, threshold: usize) -> Self {
        if succeeded == 0 {
            AcquisitionStatus::Failure
        } else if succeeded >= threshold {
            AcquisitionStatus::Success
        } else {
            AcquisitionStatus::Partial
        }
    }
}

impl std::fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AcquisitionStatus::Success => "success",
            AcquisitionStatus::Partial => "partial",
            AcquisitionStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub trade_date: String,
    pub status: AcquisitionStatus,
    /// One entry per requested exchange; skipped exchanges hold an empty placeholder.
    pub tables: BTreeMap<Exchange, ExchangeTable>,
    pub succeeded: Vec<Exchange>,
}

enum TierOutcome {
    Data(BTreeMap<String, RawTable>),
    /// Nothing usable; move on to the next tier.
    Exhausted(String),
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Exchange data gateway. Tries each tier in order per exchange, isolates exchanges
/// from each other and writes every exchange's table (or placeholder) to the sink.
pub struct ExchangeGateway {
    tiers: Vec<Arc<dyn RankSource>>,
    prices: Arc<dyn PriceSource>,
    sink: Arc<dyn TableSink>,
    pacer: RequestPacer,
    policy: FetchPolicy,
    latency: Arc<LatencyStats>,
}

impl ExchangeGateway {
    pub fn new(
        tiers: Vec<Arc<dyn RankSource>>,
        prices: Arc<dyn PriceSource>,
        sink: Arc<dyn TableSink>,
        policy: FetchPolicy,
        latency: Arc<LatencyStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pacer: RequestPacer::new(policy.request_spacing, policy.max_request_spacing),
            tiers,
            prices,
            sink,
            policy,
            latency,
        })
    }

    /// Gateway over the HTTP sources named in `cfg`, tiers in order
    /// seat-level, rank-table, legacy.
    pub fn from_config(
        cfg: &Config,
        sink: Arc<dyn TableSink>,
        latency: Arc<LatencyStats>,
    ) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs.max(1)))
            .build()?;
        let tiers: Vec<Arc<dyn RankSource>> = vec![
            Arc::new(SeatLevelSource::new(client.clone(), &cfg.seat_api_url)),
            Arc::new(TableApiSource::rank_table(client.clone(), &cfg.rank_api_url)),
            Arc::new(TableApiSource::legacy(client.clone(), &cfg.legacy_rank_api_url)),
        ];
        let prices = Arc::new(HttpPriceSource::new(client, &cfg.price_api_url));
        Ok(Self::new(tiers, prices, sink, FetchPolicy::from_config(cfg), latency))
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Acquire ranking tables for `trade_date` from every exchange in `exchanges`.
    ///
    /// The date is validated before any source is touched. Individual exchange failures
    /// never surface as errors; they show up as skipped placeholders and in the status.
    pub async fn acquire(
        self: &Arc<Self>,
        trade_date: &str,
        exchanges: &[Exchange],
    ) -> Result<AcquisitionReport> {
        let date = validate_trade_date(trade_date)?;
        info!(trade_date, exchanges = exchanges.len(), "Acquiring position rankings");

        let permits = Arc::new(Semaphore::new(self.policy.pool_width));
        let mut set = JoinSet::new();
        for &exchange in exchanges {
            let gateway = Arc::clone(self);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (exchange, gateway.acquire_exchange(exchange, date).await)
            });
        }

        let mut tables = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((exchange, table)) => {
                    tables.insert(exchange, table);
                }
                Err(e) => error!(error = %e, "Exchange acquisition task failed"),
            }
        }

        // A task that panicked never reported back; give its exchange a placeholder too.
        for &exchange in exchanges {
            if !tables.contains_key(&exchange) {
                let table = ExchangeTable::skipped(exchange, trade_date, "acquisition task failed");
                self.persist(&table).await;
                tables.insert(exchange, table);
            }
        }

        let succeeded: Vec<Exchange> = tables
            .values()
            .filter(|t| t.is_acquired())
            .map(|t| t.exchange)
            .collect();
        let status = AcquisitionStatus::from_counts(succeeded.len(), self.policy.success_threshold);
        info!(
            trade_date,
            status = %status,
            succeeded = succeeded.len(),
            requested = exchanges.len(),
            "Acquisition finished",
        );

        Ok(AcquisitionReport {
            trade_date: trade_date.to_string(),
            status,
            tables,
            succeeded,
        })
    }

    async fn acquire_exchange(&self, exchange: Exchange, date: NaiveDate) -> ExchangeTable {
        let trade_date = date.format("%Y%m%d").to_string();
        let mut reasons = Vec::new();

        let mut table = None;
        for source in &self.tiers {
            match self.run_tier(source.as_ref(), exchange, date).await {
                TierOutcome::Data(sheets) => {
                    let sheets = sanitize_sheet_names(exchange, sheets);
                    info!(
                        exchange = %exchange,
                        tier = source.name(),
                        sheets = sheets.len(),
                        "Exchange acquired",
                    );
                    table = Some(ExchangeTable::acquired(exchange, &trade_date, source.name(), sheets));
                    break;
                }
                TierOutcome::Exhausted(reason) => {
                    reasons.push(format!("{}: {reason}", source.name()));
                }
            }
        }

        let table = table.unwrap_or_else(|| {
            warn!(exchange = %exchange, "All tiers exhausted, writing placeholder");
            let reason = if reasons.is_empty() {
                "no acquisition tiers configured".to_string()
            } else {
                reasons.join("; ")
            };
            ExchangeTable::skipped(exchange, &trade_date, reason)
        });
        self.persist(&table).await;
        table
    }

    async fn run_tier(&self, source: &dyn RankSource, exchange: Exchange, date: NaiveDate) -> TierOutcome {
        let timeout = self.policy.timeout_for(exchange);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_retries {
            let started = Instant::now();
            // Dropping the future on timeout cancels the request at its next await point.
            let result =
                tokio::time::timeout(timeout, source.fetch(exchange, date, &self.pacer)).await;
            self.latency.record(started.elapsed());

            let err = match result {
                Ok(Ok(mut sheets)) => {
                    sheets.retain(|_, t| !t.is_empty());
                    if sheets.is_empty() {
                        debug!(exchange = %exchange, tier = source.name(), "Tier returned no data");
                        return TierOutcome::Exhausted("no data".to_string());
                    }
                    return TierOutcome::Data(sheets);
                }
                Err(_) | Ok(Err(FetchError::Timeout)) => {
                    warn!(
                        exchange = %exchange,
                        tier = source.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Tier timed out, abandoning",
                    );
                    tokio::time::sleep(self.policy.backoff_timeout).await;
                    return TierOutcome::Exhausted("timed out".to_string());
                }
                Ok(Err(e)) => e,
            };

            if let FetchError::RateLimited(_) = err {
                let interval = self.pacer.on_rate_limited(exchange);
                warn!(
                    exchange = %exchange,
                    interval_ms = interval.as_millis() as u64,
                    "Rate limited, widening request spacing",
                );
            }
            warn!(
                exchange = %exchange,
                tier = source.name(),
                attempt,
                max_retries = self.policy.max_retries,
                category = err.category(),
                error = %err,
                "Tier attempt failed",
            );
            last_error = err.to_string();
            if attempt < self.policy.max_retries {
                tokio::time::sleep(self.policy.backoff(&err, attempt)).await;
            }
        }

        TierOutcome::Exhausted(last_error)
    }

    async fn persist(&self, table: &ExchangeTable) {
        if let Err(e) = self.sink.store(table).await {
            error!(
                exchange = %table.exchange,
                trade_date = %table.trade_date,
                error = %e,
                "Failed to persist exchange table",
            );
        }
    }

    /// Close prices for term-structure classification. Exchanges are isolated and
    /// bounded by their tier timeout; a failing exchange only shrinks the result.
    pub async fn acquire_prices(
        self: &Arc<Self>,
        trade_date: &str,
        exchanges: &[Exchange],
    ) -> Result<Vec<PricePoint>> {
        let date = validate_trade_date(trade_date)?;
        let permits = Arc::new(Semaphore::new(self.policy.pool_width));
        let mut set = JoinSet::new();
        for &exchange in exchanges {
            let gateway = Arc::clone(self);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                gateway.prices_for(exchange, date).await
            });
        }

        let mut points = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(batch) => points.extend(batch),
                Err(e) => error!(error = %e, "Price acquisition task failed"),
            }
        }
        points.sort_by(|a, b| a.variety.cmp(&b.variety).then_with(|| a.symbol.cmp(&b.symbol)));
        Ok(points)
    }

    async fn prices_for(&self, exchange: Exchange, date: NaiveDate) -> Vec<PricePoint> {
        self.pacer.wait_turn(exchange).await;
        let timeout = self.policy.timeout_for(exchange);
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.prices.fetch_prices(exchange, date)).await;
        self.latency.record(started.elapsed());
        match result {
            Ok(Ok(points)) => {
                debug!(exchange = %exchange, points = points.len(), "Prices acquired");
                points
            }
            Ok(Err(e)) => {
                warn!(exchange = %exchange, error = %e, "Price fetch failed");
                Vec::new()
            }
            Err(_) => {
                warn!(exchange = %exchange, "Price fetch timed out");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dates and sheet names
// ---------------------------------------------------------------------------

/// `YYYYMMDD`, exactly eight ASCII digits naming a real calendar date.
pub fn validate_trade_date(s: &str) -> Result<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidTradeDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| AppError::InvalidTradeDate(s.to_string()))
}

/// The weekday before `today`. Exchange holidays are not accounted for.
pub fn recent_trading_date(today: NaiveDate) -> NaiveDate {
    let mut day = today.pred_opt().unwrap_or(today);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    day
}

/// Sheet-safe name: characters a workbook rejects become `-`, then truncated to 31 chars.
pub fn sheet_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '*' | ':' | '[' | ']' => '-',
            c => c,
        })
        .take(SHEET_NAME_MAX_CHARS)
        .collect()
}

/// Apply [`sheet_name`] to every contract. Names that collide after sanitizing get a
/// `~N` suffix so no table is lost.
fn sanitize_sheet_names(
    exchange: Exchange,
    sheets: BTreeMap<String, RawTable>,
) -> BTreeMap<String, RawTable> {
    let mut out = BTreeMap::new();
    for (name, table) in sheets {
        let base = sheet_name(&name);
        let mut candidate = base.clone();
        let mut n = 2;
        while out.contains_key(&candidate) {
            let suffix = format!("~{n}");
            let keep = SHEET_NAME_MAX_CHARS - suffix.chars().count();
            candidate = base.chars().take(keep).collect::<String>() + &suffix;
            n += 1;
        }
        if candidate != base {
            warn!(
                exchange = %exchange,
                contract = %name,
                sheet = %candidate,
                "Sheet name collision, renamed",
            );
        }
        out.insert(candidate, table);
    }
    out
}
