use async_trait::async_trait;
use uuid::Uuid;

use crate::{SignalError, TradeLogEntry};

/// Append-only sink for closed-trade records, queryable by id and session.
/// Storage mechanics live behind this seam.
#[async_trait]
pub trait TradeLogStore: Send + Sync {
    async fn append(&self, entry: TradeLogEntry) -> Result<(), SignalError>;

    async fn get(&self, id: Uuid) -> Result<Option<TradeLogEntry>, SignalError>;

    async fn for_session(&self, session_id: &str) -> Result<Vec<TradeLogEntry>, SignalError>;
}
