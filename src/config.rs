use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::types::Exchange;

pub const RANK_API_URL: &str = "http://127.0.0.1:8900";
pub const LEGACY_RANK_API_URL: &str = "http://127.0.0.1:8901";
pub const SEAT_API_URL: &str = "http://127.0.0.1:8902";
pub const PRICE_API_URL: &str = "http://127.0.0.1:8900";

/// Seats kept per contract; exchanges publish the top 20 members.
pub const TOP_SEATS: usize = 20;

/// Tier timeout for the regular exchanges (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Tier timeout for GFEX, historically the slowest source (seconds).
pub const SLOW_FETCH_TIMEOUT_SECS: u64 = 20;

/// Attempts per tier before moving on.
pub const FETCH_MAX_RETRIES: u32 = 3;

/// Minimum gap between two requests to the same exchange (milliseconds).
pub const REQUEST_SPACING_MS: u64 = 2_000;

/// Upper bound for the pacing gap after repeated rate limits (milliseconds).
pub const MAX_REQUEST_SPACING_MS: u64 = 60_000;

/// Exchanges acquired concurrently.
pub const FETCH_POOL_WIDTH: usize = 3;

/// Exchanges that must return data for the acquisition to count as a success.
pub const SUCCESS_THRESHOLD: usize = 3;

/// Backoff between attempts inside one tier, in milliseconds.
/// The base grows linearly with the attempt number; each error category adds its own increment.
pub mod backoff {
    pub const BASE_MS: u64 = 2_000;
    pub const TIMEOUT_MS: u64 = 5_000;
    pub const RATE_LIMIT_MS: u64 = 10_000;
    pub const CONNECTION_MS: u64 = 3_000;
}

/// Share of seats, ranked by position/volume, treated as informed by the spider-web strategy.
pub const SPIDER_INFORMED_RATIO: f64 = 0.4;

/// Signals per direction per strategy that take part in resonance.
pub const TOP_N_SIGNALS: usize = 10;

pub const VARIETY_SEPARATOR: &str = "_";

pub const DEFAULT_RETAIL_SEATS: &[&str] = &["东方财富", "平安期货", "徽商期货"];

/// Market outlook thresholds on the share of contracts with a spider-web long signal.
pub mod outlook_thresholds {
    pub const BULLISH: f64 = 0.7;
    pub const CAUTIOUS_BULLISH: f64 = 0.5;
    pub const CAUTIOUS_BEARISH: f64 = 0.3;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Serve the read-only API after the run (SERVE_API)
    pub serve_api: bool,
    /// Keep acquired tables in SQLite (PERSIST_TABLES); false keeps them in memory only.
    pub persist_tables: bool,
    /// YYYYMMDD to analyse (TRADE_DATE); None means the most recent weekday.
    pub trade_date: Option<String>,
    pub rank_api_url: String,
    pub legacy_rank_api_url: String,
    pub seat_api_url: String,
    pub price_api_url: String,
    pub fetch_timeout_secs: u64,
    pub slow_fetch_timeout_secs: u64,
    pub fetch_max_retries: u32,
    pub request_spacing_ms: u64,
    pub fetch_pool_width: usize,
    /// Exchanges needed for a `success` acquisition (SUCCESS_THRESHOLD)
    pub success_threshold: usize,
    /// Analyse a partial acquisition instead of rejecting it (ALLOW_PARTIAL)
    pub allow_partial: bool,
    /// ENABLED_EXCHANGES, comma-separated codes
    pub enabled_exchanges: Vec<Exchange>,
    /// RETAIL_SEATS, comma-separated member names
    pub retail_seats: Vec<String>,
    pub spider_informed_ratio: f64,
    pub top_n_signals: usize,
    pub variety_separator: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "positions.db".to_string(),
            api_port: 3000,
            serve_api: true,
            persist_tables: true,
            trade_date: None,
            rank_api_url: RANK_API_URL.to_string(),
            legacy_rank_api_url: LEGACY_RANK_API_URL.to_string(),
            seat_api_url: SEAT_API_URL.to_string(),
            price_api_url: PRICE_API_URL.to_string(),
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            slow_fetch_timeout_secs: SLOW_FETCH_TIMEOUT_SECS,
            fetch_max_retries: FETCH_MAX_RETRIES,
            request_spacing_ms: REQUEST_SPACING_MS,
            fetch_pool_width: FETCH_POOL_WIDTH,
            success_threshold: SUCCESS_THRESHOLD,
            allow_partial: false,
            enabled_exchanges: Exchange::ALL.to_vec(),
            retail_seats: DEFAULT_RETAIL_SEATS.iter().map(|s| s.to_string()).collect(),
            spider_informed_ratio: SPIDER_INFORMED_RATIO,
            top_n_signals: TOP_N_SIGNALS,
            variety_separator: VARIETY_SEPARATOR.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let success_threshold = parse_success_threshold(
            std::env::var("SUCCESS_THRESHOLD").ok().as_deref(),
            defaults.success_threshold,
        )?;

        let enabled_exchanges = match std::env::var("ENABLED_EXCHANGES") {
            Ok(raw) if !raw.trim().is_empty() => parse_exchanges(&raw)?,
            _ => defaults.enabled_exchanges,
        };

        let retail_seats = match std::env::var("RETAIL_SEATS") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.retail_seats,
        };
        validate_retail_seats(&retail_seats)?;

        let spider_informed_ratio = env_parse("SPIDER_INFORMED_RATIO", defaults.spider_informed_ratio);
        if !(spider_informed_ratio > 0.0 && spider_informed_ratio < 1.0) {
            return Err(AppError::Config(
                "SPIDER_INFORMED_RATIO must be strictly between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            serve_api: env_parse("SERVE_API", defaults.serve_api),
            persist_tables: env_parse("PERSIST_TABLES", defaults.persist_tables),
            trade_date: std::env::var("TRADE_DATE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            rank_api_url: std::env::var("RANK_API_URL").unwrap_or(defaults.rank_api_url),
            legacy_rank_api_url: std::env::var("LEGACY_RANK_API_URL")
                .unwrap_or(defaults.legacy_rank_api_url),
            seat_api_url: std::env::var("SEAT_API_URL").unwrap_or(defaults.seat_api_url),
            price_api_url: std::env::var("PRICE_API_URL").unwrap_or(defaults.price_api_url),
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
            slow_fetch_timeout_secs: env_parse(
                "SLOW_FETCH_TIMEOUT_SECS",
                defaults.slow_fetch_timeout_secs,
            ),
            fetch_max_retries: env_parse("FETCH_MAX_RETRIES", defaults.fetch_max_retries).max(1),
            request_spacing_ms: env_parse("REQUEST_SPACING_MS", defaults.request_spacing_ms),
            fetch_pool_width: env_parse("FETCH_POOL_WIDTH", defaults.fetch_pool_width).max(1),
            success_threshold,
            allow_partial: env_parse("ALLOW_PARTIAL", defaults.allow_partial),
            enabled_exchanges,
            retail_seats,
            spider_informed_ratio,
            top_n_signals: env_parse("TOP_N_SIGNALS", defaults.top_n_signals).max(1),
            variety_separator: std::env::var("VARIETY_SEPARATOR")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.variety_separator),
        })
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_exchanges(raw: &str) -> Result<Vec<Exchange>> {
    let mut out = Vec::new();
    for code in split_list(raw) {
        let ex = code.parse::<Exchange>().map_err(AppError::Config)?;
        if !out.contains(&ex) {
            out.push(ex);
        }
    }
    Ok(out)
}

/// SUCCESS_THRESHOLD when set must be an integer in 1..=5; unset or blank keeps the default.
fn parse_success_threshold(raw: Option<&str>, default: usize) -> Result<usize> {
    let threshold = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => default,
        Some(v) => v.parse::<usize>().map_err(|_| {
            AppError::Config(format!("SUCCESS_THRESHOLD must be an integer, got '{v}'"))
        })?,
    };
    if threshold == 0 || threshold > Exchange::ALL.len() {
        return Err(AppError::Config(format!(
            "SUCCESS_THRESHOLD must be between 1 and {}",
            Exchange::ALL.len()
        )));
    }
    Ok(threshold)
}

/// Retail seats must be a non-empty list of distinct, non-blank names.
pub fn validate_retail_seats(seats: &[String]) -> Result<()> {
    if seats.is_empty() {
        return Err(AppError::Config("RETAIL_SEATS must name at least one seat".to_string()));
    }
    if seats.iter().any(|s| s.trim().is_empty()) {
        return Err(AppError::Config("RETAIL_SEATS contains a blank name".to_string()));
    }
    for (i, seat) in seats.iter().enumerate() {
        if seats[..i].contains(seat) {
            return Err(AppError::Config(format!("RETAIL_SEATS lists '{seat}' twice")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retail_seats_are_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.retail_seats.len(), 3);
        assert!(validate_retail_seats(&cfg.retail_seats).is_ok());
    }

    #[test]
    fn duplicate_or_blank_retail_seats_are_rejected() {
        let dup = vec!["东方财富".to_string(), "东方财富".to_string()];
        assert!(validate_retail_seats(&dup).is_err());
        let blank = vec!["东方财富".to_string(), " ".to_string()];
        assert!(validate_retail_seats(&blank).is_err());
        assert!(validate_retail_seats(&[]).is_err());
    }

    #[test]
    fn success_threshold_is_parsed_strictly() {
        assert_eq!(parse_success_threshold(None, 3).unwrap(), 3);
        assert_eq!(parse_success_threshold(Some(" "), 3).unwrap(), 3);
        assert_eq!(parse_success_threshold(Some("4"), 3).unwrap(), 4);
        for bad in ["abc", "2.5", "-1", "0", "6"] {
            let err = parse_success_threshold(Some(bad), 3).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{bad}");
        }
    }

    #[test]
    fn exchange_list_dedupes_and_rejects_unknown_codes() {
        let parsed = parse_exchanges("dce, SHFE,dce").unwrap();
        assert_eq!(parsed, vec![Exchange::Dce, Exchange::Shfe]);
        assert!(parse_exchanges("DCE,INE").is_err());
    }
}
