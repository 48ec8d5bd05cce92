use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::models::{SheetRow, WorkbookRow};
use crate::error::{AppError, Result};
use crate::state::TableSink;
use crate::types::{Exchange, ExchangeTable, RawTable, TableStatus};

/// Workbook-per-exchange persistence: one `workbooks` row per (exchange, trade date)
/// and one `sheets` row per contract. Storing a workbook replaces all of its sheets.
#[derive(Clone)]
pub struct SqliteSink {
    pool: sqlx::SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableSink for SqliteSink {
    async fn store(&self, table: &ExchangeTable) -> Result<()> {
        let (status, tier, note) = match &table.status {
            TableStatus::Acquired { tier } => ("acquired", Some(tier.as_str()), None),
            TableStatus::Skipped { reason } => ("skipped", None, Some(reason.as_str())),
        };
        let stored_at = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sheets WHERE exchange = ? AND trade_date = ?")
            .bind(table.exchange.code())
            .bind(&table.trade_date)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO workbooks (exchange, trade_date, status, tier, note, stored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (exchange, trade_date) DO UPDATE SET
                status = excluded.status,
                tier = excluded.tier,
                note = excluded.note,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(table.exchange.code())
        .bind(&table.trade_date)
        .bind(status)
        .bind(tier)
        .bind(note)
        .bind(stored_at)
        .execute(&mut *tx)
        .await?;

        for (position, (name, sheet)) in table.sheets.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sheets (exchange, trade_date, sheet_name, position, header_json, rows_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(table.exchange.code())
            .bind(&table.trade_date)
            .bind(name)
            .bind(position as i64)
            .bind(serde_json::to_string(&sheet.columns)?)
            .bind(serde_json::to_string(&sheet.rows)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            exchange = %table.exchange,
            trade_date = %table.trade_date,
            sheets = table.sheets.len(),
            "Workbook stored",
        );
        Ok(())
    }

    async fn load(&self, exchange: Exchange, trade_date: &str) -> Result<Option<ExchangeTable>> {
        let workbook: Option<WorkbookRow> = sqlx::query_as(
            r#"
            SELECT exchange, trade_date, status, tier, note
            FROM workbooks
            WHERE exchange = ? AND trade_date = ?
            "#,
        )
        .bind(exchange.code())
        .bind(trade_date)
        .fetch_optional(&self.pool)
        .await?;
        let Some(workbook) = workbook else {
            return Ok(None);
        };

        let rows: Vec<SheetRow> = sqlx::query_as(
            r#"
            SELECT sheet_name, header_json, rows_json
            FROM sheets
            WHERE exchange = ? AND trade_date = ?
            ORDER BY position
            "#,
        )
        .bind(exchange.code())
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?;

        let mut sheets = BTreeMap::new();
        for row in rows {
            let table = RawTable::new(
                serde_json::from_str(&row.header_json)?,
                serde_json::from_str(&row.rows_json)?,
            );
            sheets.insert(row.sheet_name, table);
        }

        let status = match workbook.status.as_str() {
            "acquired" => TableStatus::Acquired {
                tier: workbook.tier.unwrap_or_default(),
            },
            _ => TableStatus::Skipped {
                reason: workbook.note.unwrap_or_default(),
            },
        };
        Ok(Some(ExchangeTable {
            exchange: Exchange::from_str(&workbook.exchange).map_err(AppError::Config)?,
            trade_date: workbook.trade_date,
            status,
            sheets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    fn sheet(rows: usize) -> RawTable {
        RawTable::new(
            vec!["rank".to_string(), "long_party_name".to_string()],
            (1..=rows).map(|i| vec![i.to_string(), format!("席位{i}")]).collect(),
        )
    }

    #[tokio::test]
    async fn workbook_round_trips() {
        let sink = SqliteSink::new(memory_pool().await.unwrap());
        let mut sheets = BTreeMap::new();
        sheets.insert("螺纹钢(RB)".to_string(), sheet(3));
        sheets.insert("热卷(HC)".to_string(), sheet(2));
        let table = ExchangeTable::acquired(Exchange::Shfe, "20250110", "seat-level", sheets);

        sink.store(&table).await.unwrap();
        let loaded = sink.load(Exchange::Shfe, "20250110").await.unwrap().unwrap();

        assert_eq!(loaded, table);
    }

    #[tokio::test]
    async fn storing_again_replaces_previous_sheets() {
        let sink = SqliteSink::new(memory_pool().await.unwrap());
        let mut sheets = BTreeMap::new();
        sheets.insert("rb2505".to_string(), sheet(2));
        sheets.insert("rb2510".to_string(), sheet(2));
        sink.store(&ExchangeTable::acquired(Exchange::Shfe, "20250110", "rank-table", sheets))
            .await
            .unwrap();

        let placeholder = ExchangeTable::skipped(Exchange::Shfe, "20250110", "rank-table: timed out");
        sink.store(&placeholder).await.unwrap();

        let loaded = sink.load(Exchange::Shfe, "20250110").await.unwrap().unwrap();
        assert_eq!(loaded, placeholder);
        assert!(loaded.sheets.is_empty());
    }

    #[tokio::test]
    async fn missing_workbook_is_none() {
        let sink = SqliteSink::new(memory_pool().await.unwrap());
        assert!(sink.load(Exchange::Gfex, "20250110").await.unwrap().is_none());
    }
}
