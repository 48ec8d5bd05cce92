pub mod table_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Exchange, ExchangeTable};

pub use table_store::TableStore;

/// Where acquired exchange tables go, keyed by `(exchange, trade_date)`.
/// `store` replaces whatever an earlier run left under the same key.
#[async_trait]
pub trait TableSink: Send + Sync {
    async fn store(&self, table: &ExchangeTable) -> Result<()>;

    async fn load(&self, exchange: Exchange, trade_date: &str) -> Result<Option<ExchangeTable>>;
}
