mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod normalize;
mod pipeline;
mod scorer;
mod state;
mod strategy;
mod term_structure;
mod types;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{ReportStore, SqliteSink};
use crate::error::{AppError, Result};
use crate::fetcher::{recent_trading_date, ExchangeGateway};
use crate::pipeline::AnalysisPipeline;
use crate::state::{TableSink, TableStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let sink: Arc<dyn TableSink> = if cfg.persist_tables {
        Arc::new(SqliteSink::new(pool.clone()))
    } else {
        info!("PERSIST_TABLES=false: acquired tables kept in memory only");
        let store: Arc<TableStore> = TableStore::new();
        store
    };
    let reports = ReportStore::new(pool.clone());
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());

    // --- Pipeline ---
    let gateway = ExchangeGateway::from_config(&cfg, Arc::clone(&sink), Arc::clone(&latency))?;
    let pipeline = AnalysisPipeline::new(&cfg, gateway, sink, Some(reports.clone()))?;

    let trade_date = match &cfg.trade_date {
        Some(d) => d.clone(),
        None => recent_trading_date(Local::now().date_naive())
            .format("%Y%m%d")
            .to_string(),
    };
    info!(
        trade_date = %trade_date,
        exchanges = cfg.enabled_exchanges.len(),
        "Starting position analysis",
    );

    match pipeline.run(&trade_date).await {
        Ok(report) => {
            health.record_run(true, now_ms());
            log_top_resonance(&report);
        }
        Err(e @ AppError::IncompleteAcquisition { .. }) => {
            health.record_run(false, now_ms());
            warn!(trade_date = %trade_date, "Analysis skipped: {e}");
        }
        Err(e) => {
            health.record_run(false, now_ms());
            if !cfg.serve_api {
                return Err(e);
            }
            error!(trade_date = %trade_date, "Analysis failed: {e}");
        }
    }

    if !cfg.serve_api {
        return Ok(());
    }

    // --- HTTP API server ---
    let app = router(ApiState {
        reports,
        latency,
        health,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn log_top_resonance(report: &pipeline::AnalysisReport) {
    for direction in [types::Direction::Long, types::Direction::Short] {
        for entry in report.resonance.ranked(direction).into_iter().take(5) {
            info!(
                event = "RESONANCE",
                direction = %direction,
                variety = %entry.variety_code,
                count = entry.count,
                "RESONANCE | {} {} | strategies: {}",
                direction,
                entry.variety_code,
                entry.strategies.join(", "),
            );
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
