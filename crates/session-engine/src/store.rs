use async_trait::async_trait;
use dashmap::DashMap;
use signal_core::{SignalError, TradeLogEntry, TradeLogStore};
use uuid::Uuid;

/// In-process trade log. Append-only; entries are never mutated or removed.
#[derive(Debug, Default)]
pub struct MemoryTradeLogStore {
    entries: DashMap<Uuid, TradeLogEntry>,
    // Insertion order per session, so queries replay in close order.
    order: DashMap<String, Vec<Uuid>>,
}

impl MemoryTradeLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TradeLogStore for MemoryTradeLogStore {
    async fn append(&self, entry: TradeLogEntry) -> Result<(), SignalError> {
        self.order
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry.id);
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TradeLogEntry>, SignalError> {
        Ok(self.entries.get(&id).map(|e| e.value().clone()))
    }

    async fn for_session(&self, session_id: &str) -> Result<Vec<TradeLogEntry>, SignalError> {
        let Some(ids) = self.order.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signal_core::{Bias, SetupStatus, SetupType, TradeResult};

    fn entry(session: &str) -> TradeLogEntry {
        TradeLogEntry {
            id: Uuid::new_v4(),
            session_id: session.to_string(),
            timestamp: Utc::now(),
            signal_type: SetupType::Continuation,
            bias: Bias::Bullish,
            status: SetupStatus::Closed,
            strike_price: 22_750.0,
            entry_price: 150.0,
            stop_loss: 130.0,
            target: 190.0,
            exit_price: 190.5,
            result: TradeResult::TargetHit,
        }
    }

    #[tokio::test]
    async fn append_then_query_by_id_and_session() {
        let store = MemoryTradeLogStore::new();
        let first = entry("nifty-1");
        let second = entry("nifty-1");
        let other = entry("nifty-2");

        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();
        store.append(other.clone()).await.unwrap();

        let found = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);

        let session = store.for_session("nifty-1").await.unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session[0].id, first.id);
        assert_eq!(session[1].id, second.id);

        assert!(store.for_session("nifty-9").await.unwrap().is_empty());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
