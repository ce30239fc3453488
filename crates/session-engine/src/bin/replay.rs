//! Replays a synthetic trending session through the full pipeline and prints
//! every status change plus the resulting trade log.
//!
//! Usage: `RUST_LOG=info cargo run --bin replay`

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use session_engine::{MemoryTradeLogStore, SessionConfig, SessionService};
use signal_core::{Candle, GreekSnapshot, MarketEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SESSION: &str = "nifty-demo";

fn candle(ts: DateTime<Utc>, open: f64, close: f64) -> MarketEvent {
    let (high, low) = if close >= open {
        (close + 3.0, open - 3.0)
    } else {
        (open + 3.0, close - 3.0)
    };
    MarketEvent::CandleClose(Candle {
        timestamp: ts,
        open,
        high,
        low,
        close,
        volume: 50_000.0,
    })
}

/// Greeks drifting bullish through the morning, premium grinding up with
/// spot.
fn greeks(ts: DateTime<Utc>, step: usize) -> MarketEvent {
    let s = step as f64;
    MarketEvent::Greeks(GreekSnapshot {
        delta: 0.40 + 0.004 * s,
        gamma: 0.0020 * (1.0 + 0.02 * s),
        theta: -14.0 - 0.05 * s,
        vega: 9.0,
        iv: 15.0 + 0.05 * s,
        premium: Some(140.0 + 0.8 * s),
        timestamp: ts,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let open = Utc.with_ymd_and_hms(2025, 6, 3, 9, 15, 0).unwrap();
    let market_close = Utc.with_ymd_and_hms(2025, 6, 3, 15, 30, 0).unwrap();

    let store = Arc::new(MemoryTradeLogStore::new());
    let service = SessionService::new(Arc::clone(&store));
    service.create_session(
        SESSION,
        SessionConfig {
            market_close,
            account_size: Some(5_000.0),
        },
    );

    let mut overrides = HashMap::new();
    overrides.insert("retest_min_percent".to_string(), 0.05);
    overrides.insert("retest_max_percent".to_string(), 0.50);
    service.update_settings(SESSION, &overrides).await?;

    // One-minute candles stair-stepping upward with shallow pullbacks, a
    // Greek snapshot every 10 seconds.
    let mut price = 22_400.0;
    let mut step = 0usize;
    for minute in 0..120u32 {
        let ts = open + Duration::minutes(minute as i64);
        let drift = match minute % 5 {
            4 => -6.0,
            _ => 9.0,
        };
        let close = price + drift;
        if let Some(outcome) = service.process(SESSION, candle(ts, price, close)).await? {
            let snap = &outcome.snapshot;
            info!(
                minute,
                close,
                bias = snap.bias.name(),
                regime = snap.market_regime.name(),
                phase = ?snap.diagnostics.price_action_details.phase,
                "candle"
            );
            if let Some(entry) = &outcome.closed {
                info!(
                    result = entry.result.label(),
                    entry_price = entry.entry_price,
                    exit = entry.exit_price,
                    "trade closed"
                );
            }
        }
        price = close;

        for s in 1..=5u32 {
            step += 1;
            let gts = ts + Duration::seconds(s as i64 * 10);
            service.process(SESSION, greeks(gts, step)).await?;
        }
    }

    let log = service.trade_log(SESSION).await?;
    println!("\n{} trade(s) recorded", log.len());
    for entry in &log {
        println!("{}", serde_json::to_string_pretty(entry)?);
    }
    Ok(())
}
