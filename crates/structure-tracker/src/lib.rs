//! Rolling market-structure state: swing pivots, EMA-20, Wilder ATR-14 and
//! candle body ratio, updated incrementally from closed candles.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_core::{Candle, SignalError, SwingKind, SwingPoint};

/// Candles retained for pivot confirmation; pivots only need the span
/// around the candidate, the rest is slack for diagnostics.
const MAX_CANDLES: usize = 100;

/// Confirmed swing points retained.
const MAX_SWINGS: usize = 40;

const EMA_PERIOD: usize = 20;
const ATR_PERIOD: usize = 14;

/// Tracks market structure from a stream of closed candles.
///
/// A candle is a swing high when its high is the strict maximum of the
/// `pivot_span` candles on each side (symmetric for swing lows), so a pivot
/// becomes visible only once its forward span has closed.
#[derive(Debug)]
pub struct StructureTracker {
    candles: VecDeque<Candle>,
    swings: VecDeque<SwingPoint>,
    pivot_span: usize,

    ema: Option<f64>,
    ema_seed: Vec<f64>,

    atr: Option<f64>,
    tr_seed: Vec<f64>,
    prev_close: Option<f64>,

    last_timestamp: Option<DateTime<Utc>>,
}

impl StructureTracker {
    pub fn new() -> Self {
        Self::with_pivot_span(1)
    }

    pub fn with_pivot_span(pivot_span: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(MAX_CANDLES),
            swings: VecDeque::with_capacity(MAX_SWINGS),
            pivot_span: pivot_span.max(1),
            ema: None,
            ema_seed: Vec::with_capacity(EMA_PERIOD),
            atr: None,
            tr_seed: Vec::with_capacity(ATR_PERIOD),
            prev_close: None,
            last_timestamp: None,
        }
    }

    /// Consume one closed candle. Candles whose timestamp does not strictly
    /// advance are rejected and leave all state untouched.
    pub fn push(&mut self, candle: Candle) -> Result<(), SignalError> {
        if let Some(previous) = self.last_timestamp {
            if candle.timestamp <= previous {
                return Err(SignalError::OutOfOrderTick {
                    previous,
                    received: candle.timestamp,
                });
            }
        }
        if candle.high < candle.low {
            return Err(SignalError::InvalidTick(format!(
                "candle high {} below low {}",
                candle.high, candle.low
            )));
        }
        self.last_timestamp = Some(candle.timestamp);

        self.update_ema(candle.close);
        self.update_atr(&candle);
        self.prev_close = Some(candle.close);

        self.candles.push_back(candle);
        if self.candles.len() > MAX_CANDLES {
            self.candles.pop_front();
        }

        self.detect_pivot();
        Ok(())
    }

    /// EMA seeded with the SMA of the first period, then recursive.
    fn update_ema(&mut self, close: f64) {
        match self.ema {
            Some(prev) => {
                let multiplier = 2.0 / (EMA_PERIOD as f64 + 1.0);
                self.ema = Some((close - prev) * multiplier + prev);
            }
            None => {
                self.ema_seed.push(close);
                if self.ema_seed.len() == EMA_PERIOD {
                    let sma = self.ema_seed.iter().sum::<f64>() / EMA_PERIOD as f64;
                    self.ema = Some(sma);
                    self.ema_seed.clear();
                }
            }
        }
    }

    /// Wilder ATR: mean of the first period's true ranges, then
    /// `(prev * (n - 1) + tr) / n`. True range needs a prior close, so the
    /// first candle only primes it.
    fn update_atr(&mut self, candle: &Candle) {
        let prev_close = match self.prev_close {
            Some(c) => c,
            None => return,
        };
        let tr = (candle.high - candle.low)
            .max((candle.high - prev_close).abs())
            .max((candle.low - prev_close).abs());

        match self.atr {
            Some(prev) => {
                self.atr = Some((prev * (ATR_PERIOD as f64 - 1.0) + tr) / ATR_PERIOD as f64);
            }
            None => {
                self.tr_seed.push(tr);
                if self.tr_seed.len() == ATR_PERIOD {
                    let mean = self.tr_seed.iter().sum::<f64>() / ATR_PERIOD as f64;
                    self.atr = Some(mean);
                    self.tr_seed.clear();
                }
            }
        }
    }

    /// Check the candle that just gained a full forward span.
    fn detect_pivot(&mut self) {
        let span = self.pivot_span;
        if self.candles.len() < 2 * span + 1 {
            return;
        }
        let idx = self.candles.len() - 1 - span;
        let candidate = self.candles[idx];

        let mut is_high = true;
        let mut is_low = true;
        for offset in 1..=span {
            let before = self.candles[idx - offset];
            let after = self.candles[idx + offset];
            if candidate.high <= before.high || candidate.high <= after.high {
                is_high = false;
            }
            if candidate.low >= before.low || candidate.low >= after.low {
                is_low = false;
            }
        }

        if is_high {
            self.record_swing(SwingPoint {
                kind: SwingKind::High,
                price: candidate.high,
                timestamp: candidate.timestamp,
            });
        }
        if is_low {
            self.record_swing(SwingPoint {
                kind: SwingKind::Low,
                price: candidate.low,
                timestamp: candidate.timestamp,
            });
        }
    }

    fn record_swing(&mut self, swing: SwingPoint) {
        let duplicate = self
            .swings
            .iter()
            .any(|s| s.kind == swing.kind && s.timestamp == swing.timestamp);
        if duplicate {
            return;
        }
        self.swings.push_back(swing);
        if self.swings.len() > MAX_SWINGS {
            self.swings.pop_front();
        }
    }

    /// Close of the most recent candle.
    pub fn latest_price(&self) -> Option<f64> {
        self.candles.back().map(|c| c.close)
    }

    pub fn latest_candle(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn ema_20(&self) -> Option<f64> {
        self.ema
    }

    pub fn atr_14(&self) -> Option<f64> {
        self.atr
    }

    pub fn latest_body_ratio(&self) -> Option<f64> {
        self.candles.back().map(Candle::body_ratio)
    }

    /// Time-ordered confirmed swing points.
    pub fn swing_points(&self) -> impl Iterator<Item = &SwingPoint> {
        self.swings.iter()
    }

    /// Prices of the most recent `n` swing points of a kind, oldest first.
    pub fn recent_swings(&self, kind: SwingKind, n: usize) -> Vec<f64> {
        let matching: Vec<f64> = self
            .swings
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.price)
            .collect();
        let start = matching.len().saturating_sub(n);
        matching[start..].to_vec()
    }

    pub fn last_swing(&self, kind: SwingKind) -> Option<&SwingPoint> {
        self.swings.iter().rev().find(|s| s.kind == kind)
    }

    /// Snapshot of everything the classifiers and the price-action detector
    /// read, taken once per tick.
    pub fn summary(&self) -> StructureSummary {
        StructureSummary {
            latest_price: self.latest_price(),
            ema_20: self.ema_20(),
            atr_14: self.atr_14(),
            body_ratio: self.latest_body_ratio(),
            swing_highs: self.recent_swings(SwingKind::High, 3),
            swing_lows: self.recent_swings(SwingKind::Low, 3),
            last_swing_high: self.last_swing(SwingKind::High).map(|s| s.price),
            last_swing_low: self.last_swing(SwingKind::Low).map(|s| s.price),
        }
    }
}

/// Point-in-time view of market structure. Swing prices are oldest first,
/// at most the three most recent of each kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureSummary {
    pub latest_price: Option<f64>,
    pub ema_20: Option<f64>,
    pub atr_14: Option<f64>,
    pub body_ratio: Option<f64>,
    pub swing_highs: Vec<f64>,
    pub swing_lows: Vec<f64>,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}

impl Default for StructureTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc::now() + Duration::minutes(5 * i),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    fn flat_candle(i: i64, price: f64) -> Candle {
        candle(i, price, price + 1.0, price - 1.0, price)
    }

    #[test]
    fn ema_warms_up_after_twenty_candles() {
        let mut tracker = StructureTracker::new();
        for i in 0..19 {
            tracker.push(flat_candle(i, 100.0)).unwrap();
            assert!(tracker.ema_20().is_none());
        }
        tracker.push(flat_candle(19, 100.0)).unwrap();
        assert_relative_eq!(tracker.ema_20().unwrap(), 100.0);
    }

    #[test]
    fn ema_tracks_constant_closes_exactly() {
        let mut tracker = StructureTracker::new();
        for i in 0..40 {
            tracker.push(flat_candle(i, 250.0)).unwrap();
        }
        assert_relative_eq!(tracker.ema_20().unwrap(), 250.0);
    }

    #[test]
    fn atr_of_constant_range_candles_equals_range() {
        let mut tracker = StructureTracker::new();
        // Identical candles: TR = high - low = 2 for every bar after the first.
        for i in 0..30 {
            tracker.push(flat_candle(i, 100.0)).unwrap();
        }
        assert_relative_eq!(tracker.atr_14().unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn atr_needs_fifteen_candles() {
        let mut tracker = StructureTracker::new();
        for i in 0..14 {
            tracker.push(flat_candle(i, 100.0)).unwrap();
            assert!(tracker.atr_14().is_none());
        }
        tracker.push(flat_candle(14, 100.0)).unwrap();
        assert!(tracker.atr_14().is_some());
    }

    #[test]
    fn swing_high_confirmed_one_candle_late() {
        let mut tracker = StructureTracker::new();
        tracker.push(candle(0, 100.0, 101.0, 99.0, 100.0)).unwrap();
        tracker.push(candle(1, 100.0, 105.0, 100.0, 104.0)).unwrap();
        assert_eq!(tracker.last_swing(SwingKind::High), None);

        // Forward span closes below the peak, confirming it.
        tracker.push(candle(2, 104.0, 104.5, 101.0, 102.0)).unwrap();
        let swing = tracker.last_swing(SwingKind::High).unwrap();
        assert_relative_eq!(swing.price, 105.0);
    }

    #[test]
    fn recent_swings_are_oldest_first() {
        let mut tracker = StructureTracker::new();
        // Three ascending peaks with valleys between them.
        let highs = [105.0, 110.0, 115.0];
        let mut i = 0;
        for peak in highs {
            tracker.push(candle(i, 100.0, 101.0, 99.0, 100.0)).unwrap();
            tracker
                .push(candle(i + 1, 100.0, peak, 100.0, peak - 1.0))
                .unwrap();
            tracker
                .push(candle(i + 2, 100.0, 100.5, 98.0, 100.0))
                .unwrap();
            i += 3;
        }
        let recent = tracker.recent_swings(SwingKind::High, 3);
        assert_eq!(recent, vec![105.0, 110.0, 115.0]);
    }

    #[test]
    fn out_of_order_candle_is_rejected() {
        let mut tracker = StructureTracker::new();
        tracker.push(flat_candle(5, 100.0)).unwrap();
        let stale = flat_candle(2, 101.0);
        assert!(matches!(
            tracker.push(stale),
            Err(SignalError::OutOfOrderTick { .. })
        ));
        assert_relative_eq!(tracker.latest_price().unwrap(), 100.0);
    }

    #[test]
    fn history_stays_bounded() {
        let mut tracker = StructureTracker::new();
        for i in 0..500 {
            let base = 100.0 + (i % 7) as f64;
            tracker.push(flat_candle(i, base)).unwrap();
        }
        assert!(tracker.candles.len() <= MAX_CANDLES);
        assert!(tracker.swings.len() <= MAX_SWINGS);
    }
}
