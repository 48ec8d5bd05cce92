use serde::Serialize;

use super::models::ReportRow;
use crate::error::Result;
use crate::pipeline::AnalysisReport;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub trade_date: String,
    pub acquisition_status: String,
    pub contracts: i64,
    pub generated_at: i64,
}

impl From<ReportRow> for ReportSummary {
    fn from(r: ReportRow) -> Self {
        Self {
            trade_date: r.trade_date,
            acquisition_status: r.acquisition_status,
            contracts: r.contracts,
            generated_at: r.generated_at,
        }
    }
}

/// Analysis reports as JSON, one per trade date. A re-run replaces the earlier report.
#[derive(Clone)]
pub struct ReportStore {
    pool: sqlx::SqlitePool,
}

impl ReportStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, report: &AnalysisReport) -> Result<()> {
        let body = serde_json::to_string(report)?;
        sqlx::query(
            r#"
            INSERT INTO analysis_reports (trade_date, acquisition_status, contracts, report, generated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (trade_date) DO UPDATE SET
                acquisition_status = excluded.acquisition_status,
                contracts = excluded.contracts,
                report = excluded.report,
                generated_at = excluded.generated_at
            "#,
        )
        .bind(&report.trade_date)
        .bind(report.acquisition.status.to_string())
        .bind(report.contracts.len() as i64)
        .bind(body)
        .bind(report.generated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, trade_date: &str) -> Result<Option<AnalysisReport>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT report FROM analysis_reports WHERE trade_date = ?")
                .bind(trade_date)
                .fetch_optional(&self.pool)
                .await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Stored reports, newest trade date first.
    pub async fn list(&self) -> Result<Vec<ReportSummary>> {
        let rows: Vec<ReportRow> = sqlx::query_as(
            r#"
            SELECT trade_date, acquisition_status, contracts, generated_at
            FROM analysis_reports
            ORDER BY trade_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReportSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::fetcher::AcquisitionStatus;
    use crate::pipeline::AcquisitionSummary;
    use crate::scorer::{MarketOutlook, OutlookReading, ResonanceReport, Statistics};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn report(date: &str, status: AcquisitionStatus) -> AnalysisReport {
        AnalysisReport {
            trade_date: date.to_string(),
            generated_at: Utc::now(),
            acquisition: AcquisitionSummary {
                status,
                succeeded: Vec::new(),
                exchanges: Vec::new(),
            },
            contracts: Vec::new(),
            skipped_contracts: vec!["DCE_broken".to_string()],
            term_structure: Vec::new(),
            strategy_signals: BTreeMap::new(),
            resonance: ResonanceReport::default(),
            statistics: Statistics::default(),
            outlook: OutlookReading {
                outlook: MarketOutlook::Bearish,
                spider_long_ratio: 0.0,
            },
            retail_seats: vec!["东方财富".to_string()],
        }
    }

    #[tokio::test]
    async fn save_is_an_upsert_by_date() {
        let store = ReportStore::new(memory_pool().await.unwrap());
        store.save(&report("20250110", AcquisitionStatus::Partial)).await.unwrap();
        store.save(&report("20250110", AcquisitionStatus::Success)).await.unwrap();
        store.save(&report("20250109", AcquisitionStatus::Success)).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].trade_date, "20250110");
        assert_eq!(list[0].acquisition_status, "success");

        let loaded = store.load("20250110").await.unwrap().unwrap();
        assert_eq!(loaded.acquisition.status, AcquisitionStatus::Success);
        assert_eq!(loaded.skipped_contracts, vec!["DCE_broken"]);
    }

    #[tokio::test]
    async fn unknown_date_is_none() {
        let store = ReportStore::new(memory_pool().await.unwrap());
        assert!(store.load("20250110").await.unwrap().is_none());
    }
}
