use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::reports::ReportStore;
use crate::error::{AppError, Result};
use crate::fetcher::{validate_trade_date, AcquisitionReport, AcquisitionStatus, ExchangeGateway};
use crate::normalize::{normalize, SchemaMap};
use crate::scorer::{OutlookReading, RankedSignals, ResonanceReport, SignalAggregator, Statistics};
use crate::state::TableSink;
use crate::strategy::{ContractAnalysis, StrategyEngine};
use crate::term_structure::classify_all;
use crate::types::{ContractTable, Exchange, ExchangeTable, TableStatus, TermStructure};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSummary {
    pub exchange: Exchange,
    pub status: TableStatus,
    pub sheets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub status: AcquisitionStatus,
    pub succeeded: Vec<Exchange>,
    pub exchanges: Vec<ExchangeSummary>,
}

impl From<&AcquisitionReport> for AcquisitionSummary {
    fn from(r: &AcquisitionReport) -> Self {
        Self {
            status: r.status,
            succeeded: r.succeeded.clone(),
            exchanges: r
                .tables
                .values()
                .map(|t| ExchangeSummary {
                    exchange: t.exchange,
                    status: t.status.clone(),
                    sheets: t.sheets.len(),
                })
                .collect(),
        }
    }
}

/// Result of analysing one trade date, persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub trade_date: String,
    pub generated_at: DateTime<Utc>,
    pub acquisition: AcquisitionSummary,
    pub contracts: Vec<ContractAnalysis>,
    /// Contract ids dropped by the normalizer for missing columns.
    pub skipped_contracts: Vec<String>,
    pub term_structure: Vec<TermStructure>,
    pub strategy_signals: BTreeMap<String, RankedSignals>,
    pub resonance: ResonanceReport,
    pub statistics: Statistics,
    pub outlook: OutlookReading,
    pub retail_seats: Vec<String>,
}

/// "Analyse trade date D": acquire, normalize, run strategies, classify term structure,
/// aggregate, persist.
pub struct AnalysisPipeline {
    gateway: Arc<ExchangeGateway>,
    sink: Arc<dyn TableSink>,
    reports: Option<ReportStore>,
    schema: SchemaMap,
    engine: StrategyEngine,
    aggregator: SignalAggregator,
    exchanges: Vec<Exchange>,
    allow_partial: bool,
    retail_seats: Vec<String>,
}

impl AnalysisPipeline {
    pub fn new(
        cfg: &Config,
        gateway: Arc<ExchangeGateway>,
        sink: Arc<dyn TableSink>,
        reports: Option<ReportStore>,
    ) -> Result<Self> {
        let schema = SchemaMap::standard();
        schema.validate()?;
        Ok(Self {
            gateway,
            sink,
            reports,
            schema,
            engine: StrategyEngine::standard(cfg),
            aggregator: SignalAggregator::from_config(cfg),
            exchanges: cfg.enabled_exchanges.clone(),
            allow_partial: cfg.allow_partial,
            retail_seats: cfg.retail_seats.clone(),
        })
    }

    pub async fn run(&self, trade_date: &str) -> Result<AnalysisReport> {
        validate_trade_date(trade_date)?;

        let acquisition = self.gateway.acquire(trade_date, &self.exchanges).await?;
        self.check_complete(&acquisition)?;

        let mut tables = Vec::new();
        let mut skipped_contracts = Vec::new();
        for exchange in &acquisition.succeeded {
            let Some(workbook) = self.load_workbook(*exchange, &acquisition).await else {
                continue;
            };
            let (normalized, skipped) = normalize_workbook(&workbook, &self.schema);
            tables.extend(normalized);
            skipped_contracts.extend(skipped);
        }
        info!(
            trade_date,
            contracts = tables.len(),
            skipped = skipped_contracts.len(),
            "Normalized ranking tables",
        );

        let contracts = self.engine.analyze_all(&tables);
        let term_structure = self.term_structure(trade_date, &acquisition.succeeded).await?;
        let aggregation = self
            .aggregator
            .aggregate(&self.engine.strategy_names(), &contracts);

        let report = AnalysisReport {
            trade_date: trade_date.to_string(),
            generated_at: Utc::now(),
            acquisition: AcquisitionSummary::from(&acquisition),
            contracts,
            skipped_contracts,
            term_structure,
            strategy_signals: aggregation.ranked,
            resonance: aggregation.resonance,
            statistics: aggregation.statistics,
            outlook: aggregation.outlook,
            retail_seats: self.retail_seats.clone(),
        };
        info!(
            trade_date,
            contracts = report.statistics.total_contracts,
            long_resonance = report.statistics.long_resonance,
            short_resonance = report.statistics.short_resonance,
            outlook = %report.outlook.outlook,
            "Analysis complete",
        );

        if let Some(reports) = &self.reports {
            reports.save(&report).await?;
        }
        Ok(report)
    }

    fn check_complete(&self, acquisition: &AcquisitionReport) -> Result<()> {
        match acquisition.status {
            AcquisitionStatus::Success => Ok(()),
            AcquisitionStatus::Partial if self.allow_partial => {
                warn!(
                    succeeded = acquisition.succeeded.len(),
                    "Analysing a partial acquisition",
                );
                Ok(())
            }
            _ => Err(AppError::IncompleteAcquisition {
                succeeded: acquisition.succeeded.len(),
                total: acquisition.tables.len(),
                required: self.gateway.policy().success_threshold,
            }),
        }
    }

    /// The exchange's workbook as stored in the sink, falling back to the in-memory copy.
    async fn load_workbook(
        &self,
        exchange: Exchange,
        acquisition: &AcquisitionReport,
    ) -> Option<ExchangeTable> {
        match self.sink.load(exchange, &acquisition.trade_date).await {
            Ok(Some(table)) => Some(table),
            Ok(None) => acquisition.tables.get(&exchange).cloned(),
            Err(e) => {
                warn!(exchange = %exchange, error = %e, "Sink read failed, using acquired copy");
                acquisition.tables.get(&exchange).cloned()
            }
        }
    }

    async fn term_structure(
        &self,
        trade_date: &str,
        exchanges: &[Exchange],
    ) -> Result<Vec<TermStructure>> {
        let prices = self.gateway.acquire_prices(trade_date, exchanges).await?;
        let curves = classify_all(&prices);
        info!(prices = prices.len(), varieties = curves.len(), "Term structure classified");
        Ok(curves)
    }
}

/// Normalize every sheet of a workbook. Returns the tables and the ids of contracts
/// dropped for missing columns.
pub fn normalize_workbook(
    workbook: &ExchangeTable,
    schema: &SchemaMap,
) -> (Vec<ContractTable>, Vec<String>) {
    let mut tables = Vec::new();
    let mut skipped = Vec::new();
    for (sheet, raw) in &workbook.sheets {
        match normalize(raw, workbook.exchange, sheet, schema) {
            Some(table) => tables.push(table),
            None => skipped.push(format!("{}_{}", workbook.exchange.code(), sheet)),
        }
    }
    (tables, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::latency::LatencyStats;
    use crate::fetcher::gateway::FetchPolicy;
    use crate::fetcher::pacer::RequestPacer;
    use crate::fetcher::sources::{PriceSource, RankSource};
    use crate::fetcher::FetchError;
    use crate::normalize::schema::CANONICAL_COLUMNS;
    use crate::state::TableStore;
    use crate::types::{Direction, PricePoint, RawTable};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::time::Duration;

    /// Serves the same two contracts on every exchange in `live`.
    struct StaticSource {
        live: Vec<Exchange>,
    }

    fn row(member: &str, vol: f64, long: (f64, f64), short: (f64, f64)) -> Vec<String> {
        vec![
            String::new(),
            member.to_string(),
            vol.to_string(),
            member.to_string(),
            long.0.to_string(),
            long.1.to_string(),
            member.to_string(),
            short.0.to_string(),
            short.1.to_string(),
        ]
    }

    fn bullish_sheet() -> RawTable {
        RawTable::new(
            CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            vec![
                row("A", 100.0, (900.0, 40.0), (100.0, -10.0)),
                row("B", 100.0, (800.0, 30.0), (200.0, -20.0)),
                row("C", 1000.0, (100.0, 5.0), (300.0, -5.0)),
                row("D", 1000.0, (100.0, 0.0), (300.0, 0.0)),
                row("东方财富", 1000.0, (50.0, -10.0), (150.0, 25.0)),
            ],
        )
    }

    #[async_trait]
    impl RankSource for StaticSource {
        fn name(&self) -> &'static str {
            "rank-table"
        }

        async fn fetch(
            &self,
            exchange: Exchange,
            _trade_date: NaiveDate,
            pacer: &RequestPacer,
        ) -> std::result::Result<BTreeMap<String, RawTable>, FetchError> {
            pacer.wait_turn(exchange).await;
            if !self.live.contains(&exchange) {
                return Ok(BTreeMap::new());
            }
            let mut sheets = BTreeMap::new();
            sheets.insert(format!("{}2505", exchange.code().to_lowercase()), bullish_sheet());
            sheets.insert(
                "broken".to_string(),
                RawTable::new(vec!["vol".to_string()], vec![vec!["1".to_string()]]),
            );
            Ok(sheets)
        }
    }

    struct StaticPrices;

    #[async_trait]
    impl PriceSource for StaticPrices {
        async fn fetch_prices(
            &self,
            exchange: Exchange,
            _trade_date: NaiveDate,
        ) -> std::result::Result<Vec<PricePoint>, FetchError> {
            let code = exchange.code().to_string();
            Ok([100.0, 95.0, 90.0]
                .iter()
                .enumerate()
                .map(|(i, close)| PricePoint {
                    variety: code.clone(),
                    symbol: format!("{code}250{}", i + 1),
                    close: *close,
                })
                .collect())
        }
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(200),
            slow_timeout: Duration::from_millis(200),
            max_retries: 1,
            backoff_base: Duration::ZERO,
            backoff_timeout: Duration::ZERO,
            backoff_rate_limit: Duration::ZERO,
            backoff_connection: Duration::ZERO,
            request_spacing: Duration::ZERO,
            max_request_spacing: Duration::ZERO,
            pool_width: 3,
            success_threshold: 3,
        }
    }

    fn pipeline(live: Vec<Exchange>, allow_partial: bool, reports: Option<ReportStore>) -> AnalysisPipeline {
        let sink = TableStore::new();
        let gateway = ExchangeGateway::new(
            vec![Arc::new(StaticSource { live })],
            Arc::new(StaticPrices),
            sink.clone(),
            policy(),
            Arc::new(LatencyStats::new()),
        );
        let cfg = Config {
            allow_partial,
            ..Config::default()
        };
        AnalysisPipeline::new(&cfg, gateway, sink, reports).unwrap()
    }

    #[tokio::test]
    async fn full_run_produces_signals_and_resonance() {
        let p = pipeline(vec![Exchange::Dce, Exchange::Czce, Exchange::Shfe], false, None);
        let report = p.run("20250110").await.unwrap();

        assert_eq!(report.acquisition.status, AcquisitionStatus::Success);
        assert_eq!(report.contracts.len(), 3);
        assert_eq!(report.skipped_contracts.len(), 3);
        let shfe = report
            .contracts
            .iter()
            .find(|c| c.contract_id == "SHFE_shfe2505")
            .unwrap();
        assert_eq!(shfe.signals["power_change"].direction, Direction::Long);
        assert_eq!(shfe.signals["spider_web"].direction, Direction::Long);
        assert_eq!(shfe.signals["retail_reverse"].direction, Direction::Long);
        assert_eq!(report.term_structure.len(), 3);
        assert_eq!(report.statistics.total_contracts, 3);
        assert_eq!(report.acquisition.exchanges.len(), 5);
    }

    #[tokio::test]
    async fn partial_acquisition_is_rejected_unless_allowed() {
        let p = pipeline(vec![Exchange::Dce], false, None);
        let err = p.run("20250110").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::IncompleteAcquisition {
                succeeded: 1,
                total: 5,
                required: 3
            }
        ));

        let p = pipeline(vec![Exchange::Dce], true, None);
        let report = p.run("20250110").await.unwrap();
        assert_eq!(report.acquisition.status, AcquisitionStatus::Partial);
        assert_eq!(report.contracts.len(), 1);
    }

    #[tokio::test]
    async fn failure_is_never_analysed() {
        let p = pipeline(Vec::new(), true, None);
        assert!(matches!(
            p.run("20250110").await,
            Err(AppError::IncompleteAcquisition { succeeded: 0, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_date_is_rejected() {
        let p = pipeline(Exchange::ALL.to_vec(), false, None);
        assert!(matches!(p.run("2025-01-10").await, Err(AppError::InvalidTradeDate(_))));
    }

    #[tokio::test]
    async fn report_is_persisted() {
        let pool = crate::db::memory_pool().await.unwrap();
        let store = ReportStore::new(pool);
        let p = pipeline(Exchange::ALL.to_vec(), false, Some(store.clone()));
        let report = p.run("20250110").await.unwrap();

        let loaded = store.load("20250110").await.unwrap().unwrap();
        assert_eq!(loaded.contracts.len(), report.contracts.len());
        assert_eq!(loaded.resonance, report.resonance);
    }

    #[test]
    fn normalize_workbook_drops_broken_sheets() {
        let mut sheets = BTreeMap::new();
        sheets.insert("rb2505".to_string(), bullish_sheet());
        sheets.insert("bad".to_string(), RawTable::default());
        let workbook = ExchangeTable::acquired(Exchange::Shfe, "20250110", "legacy", sheets);
        let (tables, skipped) = normalize_workbook(&workbook, &SchemaMap::standard());
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].contract_id(), "SHFE_rb2505");
        assert_eq!(skipped, vec!["SHFE_bad"]);
    }
}
