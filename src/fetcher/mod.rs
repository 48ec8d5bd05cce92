pub mod gateway;
pub mod pacer;
pub mod sources;

use thiserror::Error;

pub use gateway::{
    recent_trading_date, validate_trade_date, AcquisitionReport, AcquisitionStatus,
    ExchangeGateway,
};

/// Why a single tier attempt failed. The category decides the backoff.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl FetchError {
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::RateLimited(_) => "rate_limit",
            FetchError::Connection(_) => "connection",
            FetchError::Upstream(_) => "upstream",
        }
    }

    /// Classify a free-form upstream message.
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") {
            FetchError::RateLimited(msg)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FetchError::Timeout
        } else if lower.contains("connection") {
            FetchError::Connection(msg)
        } else {
            FetchError::Upstream(msg)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            FetchError::RateLimited(e.to_string())
        } else if e.is_connect() {
            FetchError::Connection(e.to_string())
        } else {
            FetchError::from_message(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Upstream(format!("malformed payload: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_classified_by_category() {
        assert_eq!(FetchError::from_message("Rate limit exceeded").category(), "rate_limit");
        assert_eq!(FetchError::from_message("read timed out").category(), "timeout");
        assert_eq!(FetchError::from_message("Connection reset by peer").category(), "connection");
        assert_eq!(FetchError::from_message("no table for date").category(), "upstream");
    }
}
