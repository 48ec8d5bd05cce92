use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::db::reports::{ReportStore, ReportSummary};
use crate::error::AppError;
use crate::fetcher::validate_trade_date;
use crate::pipeline::AnalysisReport;
use crate::scorer::ResonanceReport;
use crate::types::{Direction, Signal};

#[derive(Clone)]
pub struct ApiState {
    pub reports: ReportStore,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/reports", get(get_reports))
        .route("/reports/:date", get(get_report))
        .route("/reports/:date/resonance", get(get_resonance))
        .route("/reports/:date/signals", get(get_signals))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SignalsQuery {
    pub strategy: Option<String>,
    pub direction: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_reports(State(state): State<ApiState>) -> Result<Json<Vec<ReportSummary>>, AppError> {
    Ok(Json(state.reports.list().await?))
}

async fn load_report(state: &ApiState, date: &str) -> Result<AnalysisReport, AppError> {
    validate_trade_date(date)?;
    state
        .reports
        .load(date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no report for {date}")))
}

async fn get_report(
    State(state): State<ApiState>,
    Path(date): Path<String>,
) -> Result<Json<AnalysisReport>, AppError> {
    Ok(Json(load_report(&state, &date).await?))
}

async fn get_resonance(
    State(state): State<ApiState>,
    Path(date): Path<String>,
) -> Result<Json<ResonanceReport>, AppError> {
    Ok(Json(load_report(&state, &date).await?.resonance))
}

async fn get_signals(
    State(state): State<ApiState>,
    Path(date): Path<String>,
    Query(params): Query<SignalsQuery>,
) -> Result<Json<Vec<Signal>>, AppError> {
    let direction = params
        .direction
        .as_deref()
        .map(str::parse::<Direction>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let report = load_report(&state, &date).await?;

    let signals = report
        .contracts
        .into_iter()
        .flat_map(|c| c.signals.into_values())
        .filter(|s| params.strategy.as_deref().map_or(true, |name| s.strategy == name))
        .filter(|s| direction.map_or(true, |d| s.direction == d))
        .collect();

    Ok(Json(signals))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::fetcher::AcquisitionStatus;
    use crate::pipeline::AcquisitionSummary;
    use crate::scorer::{MarketOutlook, OutlookReading, Statistics};
    use crate::strategy::ContractAnalysis;
    use crate::types::Exchange;
    use chrono::Utc;
    use std::collections::BTreeMap;

    async fn state_with_report() -> ApiState {
        let reports = ReportStore::new(memory_pool().await.unwrap());
        let contract_id = "SHFE_rb2505".to_string();
        let mut signals = BTreeMap::new();
        signals.insert(
            "power_change".to_string(),
            Signal::computed("power_change", &contract_id, Direction::Long, 120.0, "up"),
        );
        signals.insert(
            "spider_web".to_string(),
            Signal::computed("spider_web", &contract_id, Direction::Short, 0.2, "down"),
        );
        let report = AnalysisReport {
            trade_date: "20250110".to_string(),
            generated_at: Utc::now(),
            acquisition: AcquisitionSummary {
                status: AcquisitionStatus::Success,
                succeeded: vec![Exchange::Shfe],
                exchanges: Vec::new(),
            },
            contracts: vec![ContractAnalysis {
                contract_id: contract_id.clone(),
                exchange: Exchange::Shfe,
                label: "rb2505".to_string(),
                total_long: 0.0,
                total_short: 0.0,
                total_long_change: 0.0,
                total_short_change: 0.0,
                signals,
            }],
            skipped_contracts: Vec::new(),
            term_structure: Vec::new(),
            strategy_signals: BTreeMap::new(),
            resonance: ResonanceReport::default(),
            statistics: Statistics::default(),
            outlook: OutlookReading {
                outlook: MarketOutlook::Bearish,
                spider_long_ratio: 0.0,
            },
            retail_seats: Vec::new(),
        };
        reports.save(&report).await.unwrap();
        ApiState {
            reports,
            latency: Arc::new(LatencyStats::new()),
            health: Arc::new(HealthState::new()),
        }
    }

    #[tokio::test]
    async fn report_lookup_validates_and_404s() {
        let state = state_with_report().await;

        let ok = get_report(State(state.clone()), Path("20250110".to_string())).await;
        assert_eq!(ok.unwrap().0.contracts.len(), 1);

        let missing = get_report(State(state.clone()), Path("20250109".to_string())).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let bad = get_report(State(state), Path("2025-01-10".to_string())).await;
        assert!(matches!(bad, Err(AppError::InvalidTradeDate(_))));
    }

    #[tokio::test]
    async fn signals_filter_by_strategy_and_direction() {
        let state = state_with_report().await;
        let query = |strategy: Option<&str>, direction: Option<&str>| {
            Query(SignalsQuery {
                strategy: strategy.map(String::from),
                direction: direction.map(String::from),
            })
        };

        let all = get_signals(State(state.clone()), Path("20250110".to_string()), query(None, None))
            .await
            .unwrap();
        assert_eq!(all.0.len(), 2);

        let longs = get_signals(
            State(state.clone()),
            Path("20250110".to_string()),
            query(None, Some("long")),
        )
        .await
        .unwrap();
        assert_eq!(longs.0.len(), 1);
        assert_eq!(longs.0[0].strategy, "power_change");

        let spider = get_signals(
            State(state.clone()),
            Path("20250110".to_string()),
            query(Some("spider_web"), Some("long")),
        )
        .await
        .unwrap();
        assert!(spider.0.is_empty());

        let bad = get_signals(State(state), Path("20250110".to_string()), query(None, Some("up"))).await;
        assert!(matches!(bad, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn report_list_and_latency() {
        let state = state_with_report().await;
        let list = get_reports(State(state.clone())).await.unwrap();
        assert_eq!(list.0.len(), 1);

        state.latency.record(std::time::Duration::from_millis(25));
        assert_eq!(get_stats_latency(State(state)).await.0.samples, 1);
    }
}
