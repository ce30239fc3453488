use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use greek_smoother::GreekSmoother;
use serde::{Deserialize, Serialize};
use market_classifier::{classify_bias, classify_regime};
use setup_detector::{confirm_candidate, PriceActionDetector};
use signal_core::{
    Candle, ConfirmationAssessment, Diagnostics, GreekSnapshot, MarketEvent, SignalError,
    StatusSnapshot, StrategySettings, TradeLogEntry,
};
use structure_tracker::{StructureSummary, StructureTracker};
use trade_lifecycle::SetupLifecycle;
use tracing::debug;

/// Static session parameters. `account_size` may be set or changed after the
/// session starts; entries are deferred until it exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub market_close: DateTime<Utc>,
    pub account_size: Option<f64>,
}

/// Result of one accepted tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub snapshot: StatusSnapshot,
    /// Present only on the tick that closed a trade.
    pub closed: Option<TradeLogEntry>,
}

/// One session's full pipeline state. All methods are synchronous; callers
/// serialize ticks per session.
pub struct SessionEngine {
    session_id: String,
    config: SessionConfig,
    settings: StrategySettings,
    structure: StructureTracker,
    smoother: GreekSmoother,
    detector: PriceActionDetector,
    lifecycle: SetupLifecycle,
    /// Body ratio of the BOS candle behind the pending candidate; feeds the
    /// breakout confirmation vote.
    pending_bos_body_ratio: Option<f64>,
    last_confirmation: Option<ConfirmationAssessment>,
}

impl SessionEngine {
    pub fn new(session_id: impl Into<String>, config: SessionConfig) -> Self {
        let session_id = session_id.into();
        Self {
            lifecycle: SetupLifecycle::new(session_id.clone()),
            session_id,
            config,
            settings: StrategySettings::default(),
            structure: StructureTracker::new(),
            smoother: GreekSmoother::new(),
            detector: PriceActionDetector::new(),
            pending_bos_body_ratio: None,
            last_confirmation: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Batch settings update; takes effect from the next tick.
    pub fn apply_settings(&mut self, map: &HashMap<String, f64>) -> Result<(), SignalError> {
        self.settings.apply_map(map)
    }

    pub fn set_account_size(&mut self, account_size: f64) {
        self.config.account_size = Some(account_size);
    }

    /// Dispatch one event from the session's ordered stream.
    pub fn process(&mut self, event: MarketEvent) -> Result<TickOutcome, SignalError> {
        match event {
            MarketEvent::CandleClose(candle) => self.on_candle(candle),
            MarketEvent::Greeks(snapshot) => self.on_greeks(snapshot),
        }
    }

    /// Process one closed candle: update structure, re-run the classifier
    /// stack, advance the detector, then run entry/exit checks.
    pub fn on_candle(&mut self, candle: Candle) -> Result<TickOutcome, SignalError> {
        let settings = self.settings.clone();
        self.structure.push(candle)?;
        let now = candle.timestamp;

        let summary = self.structure.summary();
        let smoothed = self.smoother.smoothed();
        let bias = classify_bias(&summary, smoothed.as_ref(), &settings);
        let regime = classify_regime(&summary, smoothed.as_ref(), &settings);

        self.invalidate_stale_candidate(now, bias.bias, &settings);

        if self.lifecycle.is_active() || self.in_cooldown(now) || self.lifecycle.candidate().is_some() {
            // Structure keeps updating while a trade runs or a candidate
            // awaits confirmation, but no new level may arm until the
            // session is flat, out of cooldown, and holds no candidate.
            self.detector.reset();
        } else {
            self.detector.expire_stale(now, &settings);
            self.detector
                .on_candle(&candle, &summary, bias.bias, regime.regime, &settings);
            self.hand_off_candidate(now);
        }

        let closed = self.evaluate_trade(now, smoothed.as_ref(), &settings);
        Ok(self.outcome(bias, regime, summary, closed))
    }

    /// Process one Greek snapshot: refresh the smoothing window, then re-run
    /// confirmation and exit checks. Structure and detection only move on
    /// candle closes.
    pub fn on_greeks(&mut self, snapshot: GreekSnapshot) -> Result<TickOutcome, SignalError> {
        let settings = self.settings.clone();
        self.smoother.push(snapshot)?;
        let now = snapshot.timestamp;

        let summary = self.structure.summary();
        let smoothed = self.smoother.smoothed();
        let bias = classify_bias(&summary, smoothed.as_ref(), &settings);
        let regime = classify_regime(&summary, smoothed.as_ref(), &settings);

        self.invalidate_stale_candidate(now, bias.bias, &settings);
        if !self.lifecycle.is_active() && !self.in_cooldown(now) {
            self.detector.expire_stale(now, &settings);
        }

        let closed = self.evaluate_trade(now, smoothed.as_ref(), &settings);
        Ok(self.outcome(bias, regime, summary, closed))
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.lifecycle.cooldown_until().is_some_and(|until| now < until)
    }

    /// A pending candidate dies when the session bias stops agreeing with it
    /// or it outlives the confirmation window.
    fn invalidate_stale_candidate(
        &mut self,
        now: DateTime<Utc>,
        bias: signal_core::Bias,
        settings: &StrategySettings,
    ) {
        let Some(candidate) = self.lifecycle.candidate() else {
            return;
        };
        let timeout = Duration::seconds((settings.confirm_timeout_minutes * 60.0) as i64);
        let stale = candidate.bias != bias || now - candidate.created_at > timeout;
        if stale {
            debug!(session = %self.session_id, "dropping stale candidate");
            self.lifecycle.invalidate_candidate();
            self.pending_bos_body_ratio = None;
            self.last_confirmation = None;
        }
    }

    fn hand_off_candidate(&mut self, now: DateTime<Utc>) {
        let Some(candidate) = self.detector.candidate().cloned() else {
            return;
        };
        let body_ratio = self.detector.context().map(|c| c.bos_body_ratio);
        if self.lifecycle.accept_candidate(candidate, now) {
            self.pending_bos_body_ratio = body_ratio;
            self.last_confirmation = None;
            self.detector.reset();
        }
    }

    /// Confirmation vote on a pending candidate, then exit checks on an
    /// active trade. At most one of the two applies on any tick.
    fn evaluate_trade(
        &mut self,
        now: DateTime<Utc>,
        smoothed: Option<&signal_core::SmoothedGreeks>,
        settings: &StrategySettings,
    ) -> Option<TradeLogEntry> {
        let premium = self.smoother.latest_premium();

        if let Some(candidate) = self.lifecycle.candidate().cloned() {
            let assessment =
                confirm_candidate(&candidate, smoothed, self.pending_bos_body_ratio, settings);
            let approved = assessment.approved;
            self.last_confirmation = Some(assessment);
            if approved {
                self.lifecycle
                    .try_enter(now, premium, self.config.account_size, settings);
            }
        }

        let closed =
            self.lifecycle
                .on_tick(now, premium, smoothed, self.config.market_close, settings);
        if closed.is_some() {
            self.pending_bos_body_ratio = None;
            self.last_confirmation = None;
            self.detector.reset();
        }
        closed
    }

    fn outcome(
        &self,
        bias: signal_core::BiasAssessment,
        regime: signal_core::RegimeAssessment,
        summary: StructureSummary,
        closed: Option<TradeLogEntry>,
    ) -> TickOutcome {
        let candidate_setup = self
            .lifecycle
            .candidate()
            .or_else(|| self.lifecycle.active_trade().map(|t| &t.candidate))
            .cloned()
            .or_else(|| self.detector.candidate().cloned());

        let snapshot = StatusSnapshot {
            session_id: self.session_id.clone(),
            bias: bias.bias,
            market_regime: regime.regime,
            candidate_setup,
            diagnostics: Diagnostics {
                price_action_details: self.detector.details(&summary),
                bias_details: bias,
                market_type_details: regime,
                greek_confirmation_details: self.last_confirmation.clone(),
            },
        };
        TickOutcome { snapshot, closed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use signal_core::{Bias, DetectionPhase, MarketRegime};

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 10, minute, second).unwrap()
    }

    fn engine() -> SessionEngine {
        SessionEngine::new(
            "nifty-1",
            SessionConfig {
                market_close: Utc.with_ymd_and_hms(2025, 6, 3, 15, 30, 0).unwrap(),
                account_size: Some(2_000.0),
            },
        )
    }

    fn candle(minute: u32, close: f64) -> Candle {
        Candle {
            timestamp: at(minute, 0),
            open: close - 5.0,
            high: close + 2.0,
            low: close - 8.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn cold_session_reports_neutral_everything() {
        let mut engine = engine();
        let outcome = engine.on_candle(candle(0, 22_500.0)).unwrap();

        assert_eq!(outcome.snapshot.bias, Bias::Neutral);
        assert_eq!(outcome.snapshot.market_regime, MarketRegime::Neutral);
        assert_eq!(
            outcome.snapshot.diagnostics.price_action_details.phase,
            DetectionPhase::None
        );
        assert!(outcome.snapshot.candidate_setup.is_none());
        assert!(outcome.closed.is_none());
    }

    #[test]
    fn out_of_order_candle_errors_and_stream_recovers() {
        let mut engine = engine();
        engine.on_candle(candle(5, 22_500.0)).unwrap();

        let err = engine.on_candle(candle(5, 22_510.0)).unwrap_err();
        assert!(matches!(err, SignalError::OutOfOrderTick { .. }));

        engine.on_candle(candle(6, 22_505.0)).unwrap();
    }

    #[test]
    fn greek_tick_before_any_candle_is_accepted() {
        let mut engine = engine();
        let outcome = engine
            .on_greeks(GreekSnapshot {
                delta: 0.45,
                gamma: 0.002,
                theta: -14.0,
                vega: 9.0,
                iv: 15.0,
                premium: Some(150.0),
                timestamp: at(0, 10),
            })
            .unwrap();
        assert_eq!(outcome.snapshot.bias, Bias::Neutral);
    }

    #[test]
    fn rejected_settings_batch_leaves_settings_untouched() {
        let mut engine = engine();
        let mut map = HashMap::new();
        map.insert("risk_percent".to_string(), -2.0);
        map.insert("risk_reward_ratio".to_string(), 3.0);

        assert!(engine.apply_settings(&map).is_err());
        assert_eq!(engine.settings().risk_percent, 1.0);
        assert_eq!(engine.settings().risk_reward_ratio, 2.0);

        map.insert("risk_percent".to_string(), 0.5);
        engine.apply_settings(&map).unwrap();
        assert_eq!(engine.settings().risk_percent, 0.5);
        assert_eq!(engine.settings().risk_reward_ratio, 3.0);
    }
}
