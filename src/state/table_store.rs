use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::TableSink;
use crate::error::Result;
use crate::types::{Exchange, ExchangeTable};

/// In-memory table sink. Used when no database is wanted and in tests.
#[derive(Debug, Default)]
pub struct TableStore {
    tables: DashMap<(Exchange, String), ExchangeTable>,
}

impl TableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn get(&self, exchange: Exchange, trade_date: &str) -> Option<ExchangeTable> {
        self.tables
            .get(&(exchange, trade_date.to_string()))
            .map(|t| t.clone())
    }
}

#[async_trait]
impl TableSink for TableStore {
    async fn store(&self, table: &ExchangeTable) -> Result<()> {
        self.tables
            .insert((table.exchange, table.trade_date.clone()), table.clone());
        Ok(())
    }

    async fn load(&self, exchange: Exchange, trade_date: &str) -> Result<Option<ExchangeTable>> {
        Ok(self.get(exchange, trade_date))
    }
}
