use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use signal_core::{MarketEvent, SignalError, TradeLogEntry, TradeLogStore};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::engine::{SessionConfig, SessionEngine, TickOutcome};

/// Hosts one `SessionEngine` per session id.
///
/// Ticks for one session are serialized by its mutex; different sessions
/// proceed independently. Closed trades are handed to the store on a spawned
/// task so persistence latency never gates the next tick.
pub struct SessionService<S: TradeLogStore + 'static> {
    sessions: DashMap<String, Arc<Mutex<SessionEngine>>>,
    store: Arc<S>,
}

impl<S: TradeLogStore + 'static> SessionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
        }
    }

    /// Register a session, replacing any previous engine under the same id.
    pub fn create_session(&self, session_id: impl Into<String>, config: SessionConfig) {
        let session_id = session_id.into();
        let engine = SessionEngine::new(session_id.clone(), config);
        self.sessions
            .insert(session_id, Arc::new(Mutex::new(engine)));
    }

    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    fn engine(&self, session_id: &str) -> Result<Arc<Mutex<SessionEngine>>, SignalError> {
        self.sessions
            .get(session_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| SignalError::SessionNotFound(session_id.to_string()))
    }

    /// Feed one event to a session. A rejected tick (malformed or
    /// out-of-order) is logged and swallowed; session state is unchanged and
    /// `None` is returned.
    pub async fn process(
        &self,
        session_id: &str,
        event: MarketEvent,
    ) -> Result<Option<TickOutcome>, SignalError> {
        let engine = self.engine(session_id)?;
        let outcome = {
            let mut engine = engine.lock().await;
            engine.process(event)
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = session_id, error = %e, "tick rejected");
                return Ok(None);
            }
        };

        if let Some(entry) = outcome.closed.clone() {
            self.persist(entry);
        }
        Ok(Some(outcome))
    }

    fn persist(&self, entry: TradeLogEntry) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.append(entry).await {
                error!(error = %e, "failed to persist trade log entry");
            }
        });
    }

    /// Batch settings update for one session, effective from its next tick.
    pub async fn update_settings(
        &self,
        session_id: &str,
        map: &HashMap<String, f64>,
    ) -> Result<(), SignalError> {
        let engine = self.engine(session_id)?;
        let mut engine = engine.lock().await;
        engine.apply_settings(map)
    }

    pub async fn set_account_size(
        &self,
        session_id: &str,
        account_size: f64,
    ) -> Result<(), SignalError> {
        let engine = self.engine(session_id)?;
        let mut engine = engine.lock().await;
        engine.set_account_size(account_size);
        Ok(())
    }

    pub async fn trade_log(&self, session_id: &str) -> Result<Vec<TradeLogEntry>, SignalError> {
        self.store.for_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use signal_core::{Candle, GreekSnapshot};

    use crate::store::MemoryTradeLogStore;

    fn service() -> SessionService<MemoryTradeLogStore> {
        SessionService::new(Arc::new(MemoryTradeLogStore::new()))
    }

    fn config() -> SessionConfig {
        SessionConfig {
            market_close: Utc.with_ymd_and_hms(2025, 6, 3, 15, 30, 0).unwrap(),
            account_size: Some(2_000.0),
        }
    }

    fn candle(minute: u32, close: f64) -> MarketEvent {
        MarketEvent::CandleClose(Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 3, 10, minute, 0).unwrap(),
            open: close - 5.0,
            high: close + 2.0,
            low: close - 8.0,
            close,
            volume: 1_000.0,
        })
    }

    fn greeks(minute: u32, second: u32) -> MarketEvent {
        MarketEvent::Greeks(GreekSnapshot {
            delta: 0.45,
            gamma: 0.002,
            theta: -14.0,
            vega: 9.0,
            iv: 15.0,
            premium: Some(150.0),
            timestamp: Utc
                .with_ymd_and_hms(2025, 6, 3, 10, minute, second)
                .unwrap(),
        })
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let service = service();
        let err = service.process("missing", candle(0, 22_500.0)).await;
        assert!(matches!(err, Err(SignalError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn ticks_flow_and_snapshots_come_back() {
        let service = service();
        service.create_session("nifty-1", config());

        let outcome = service
            .process("nifty-1", candle(0, 22_500.0))
            .await
            .unwrap()
            .expect("tick should be accepted");
        assert_eq!(outcome.snapshot.session_id, "nifty-1");
        assert!(outcome.closed.is_none());
    }

    #[tokio::test]
    async fn out_of_order_tick_is_swallowed_with_state_unchanged() {
        let service = service();
        service.create_session("nifty-1", config());

        service
            .process("nifty-1", candle(5, 22_500.0))
            .await
            .unwrap();
        // Same timestamp again: rejected, not an error.
        let outcome = service
            .process("nifty-1", candle(5, 22_510.0))
            .await
            .unwrap();
        assert!(outcome.is_none());

        // The stream continues normally afterwards.
        let outcome = service
            .process("nifty-1", candle(6, 22_505.0))
            .await
            .unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn greek_ticks_are_accepted_between_candles() {
        let service = service();
        service.create_session("nifty-1", config());

        service
            .process("nifty-1", candle(0, 22_500.0))
            .await
            .unwrap();
        for (minute, second) in [(0, 10), (0, 20), (0, 30), (0, 40)] {
            let outcome = service
                .process("nifty-1", greeks(minute, second))
                .await
                .unwrap();
            assert!(outcome.is_some());
        }
    }

    #[tokio::test]
    async fn settings_updates_target_one_session() {
        let service = service();
        service.create_session("nifty-1", config());
        service.create_session("nifty-2", config());

        let mut map = HashMap::new();
        map.insert("risk_reward_ratio".to_string(), 3.0);
        service.update_settings("nifty-1", &map).await.unwrap();

        let err = service.update_settings("missing", &map).await;
        assert!(matches!(err, Err(SignalError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn removed_session_stops_accepting_ticks() {
        let service = service();
        service.create_session("nifty-1", config());
        assert!(service.remove_session("nifty-1"));
        assert!(!service.remove_session("nifty-1"));

        let err = service.process("nifty-1", candle(0, 22_500.0)).await;
        assert!(matches!(err, Err(SignalError::SessionNotFound(_))));
    }
}
