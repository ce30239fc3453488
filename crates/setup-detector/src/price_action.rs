use chrono::{DateTime, Duration, Utc};
use signal_core::{
    Bias, Candle, CandidateSetup, DetectionPhase, MarketRegime, PriceActionDetails, SetupStatus,
    SetupType, StrategySettings,
};
use structure_tracker::StructureSummary;
use tracing::{debug, info};

/// Everything recorded at break-of-structure time and carried through the
/// retest.
#[derive(Debug, Clone)]
pub struct BosContext {
    pub direction: Bias,
    pub structural_level: f64,
    pub bos_body_ratio: f64,
    pub atm_strike: f64,
    pub strike_price: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
enum State {
    None,
    BosDetected(BosContext),
    RetestWindow(BosContext),
    CandidateReady {
        context: BosContext,
        candidate: CandidateSetup,
    },
}

/// Break-of-structure + retest state machine. One per session.
///
/// Raises at most one candidate at a time; the lifecycle manager owns the
/// candidate once entry is approved. The engine holds the detector in its
/// idle state while a trade is active or a cooldown is running.
#[derive(Debug)]
pub struct PriceActionDetector {
    state: State,
    last_retracement: Option<f64>,
}

impl PriceActionDetector {
    pub fn new() -> Self {
        Self {
            state: State::None,
            last_retracement: None,
        }
    }

    /// Process one closed candle against current structure, bias and regime.
    pub fn on_candle(
        &mut self,
        candle: &Candle,
        structure: &StructureSummary,
        bias: Bias,
        regime: MarketRegime,
        settings: &StrategySettings,
    ) {
        // A bias flip (or loss of bias) invalidates any armed level.
        if let Some(direction) = self.direction() {
            if bias != direction {
                debug!(?direction, ?bias, "bias changed, dropping armed structure level");
                self.reset();
            }
        }

        match std::mem::replace(&mut self.state, State::None) {
            State::None => {
                self.last_retracement = None;
                if let Some(context) = detect_bos(candle, structure, bias, settings) {
                    info!(
                        direction = context.direction.name(),
                        level = context.structural_level,
                        strike = context.strike_price,
                        "break of structure detected"
                    );
                    self.state = State::BosDetected(context);
                }
            }
            // The BOS candle itself never counts as a retest; the window
            // opens on the next close.
            State::BosDetected(context) => {
                self.check_retest(candle, regime, context, settings);
            }
            State::RetestWindow(context) => {
                self.check_retest(candle, regime, context, settings);
            }
            // Idempotent: repeated in-band ticks keep the same candidate.
            State::CandidateReady { context, candidate } => {
                self.last_retracement =
                    Some(retracement_percent(candle.close, context.structural_level));
                self.state = State::CandidateReady { context, candidate };
            }
        }
    }

    fn check_retest(
        &mut self,
        candle: &Candle,
        regime: MarketRegime,
        context: BosContext,
        settings: &StrategySettings,
    ) {
        let retracement = retracement_percent(candle.close, context.structural_level);
        self.last_retracement = Some(retracement);

        let in_band = retracement >= settings.retest_min_percent
            && retracement <= settings.retest_max_percent;
        if !in_band {
            self.state = State::RetestWindow(context);
            return;
        }

        let setup_type = match regime {
            MarketRegime::Trendy => Some(SetupType::Continuation),
            MarketRegime::Volatile => {
                // Closing back through the level in the break direction keeps
                // the breakout thesis; holding on the wrong side of it means
                // the break is being rejected.
                let held = match context.direction {
                    Bias::Bullish => candle.close > context.structural_level,
                    _ => candle.close < context.structural_level,
                };
                Some(if held {
                    SetupType::Breakout
                } else {
                    SetupType::Reversal
                })
            }
            // No regime conviction: keep waiting inside the window.
            MarketRegime::Neutral => None,
        };

        match setup_type {
            Some(setup_type) => {
                let candidate = CandidateSetup {
                    setup_type,
                    bias: context.direction,
                    atm_strike: context.atm_strike,
                    strike_price: context.strike_price,
                    structural_level: context.structural_level,
                    status: SetupStatus::PendingConfirmation,
                    created_at: candle.timestamp,
                };
                info!(
                    setup = setup_type.name(),
                    level = context.structural_level,
                    retracement,
                    "retest complete, candidate raised"
                );
                self.state = State::CandidateReady { context, candidate };
            }
            None => self.state = State::RetestWindow(context),
        }
    }

    /// Drop a stale armed level or pending candidate.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, settings: &StrategySettings) {
        let timeout = Duration::seconds((settings.confirm_timeout_minutes * 60.0) as i64);
        let expired = match &self.state {
            State::None => false,
            State::BosDetected(ctx) | State::RetestWindow(ctx) => now - ctx.detected_at > timeout,
            State::CandidateReady { candidate, .. } => now - candidate.created_at > timeout,
        };
        if expired {
            debug!("armed structure level or pending candidate timed out");
            self.reset();
        }
    }

    /// Force the detector back to idle (trade entered, cooldown, or
    /// invalidation).
    pub fn reset(&mut self) {
        self.state = State::None;
        self.last_retracement = None;
    }

    pub fn phase(&self) -> DetectionPhase {
        match self.state {
            State::None => DetectionPhase::None,
            State::BosDetected(_) => DetectionPhase::BosDetected,
            State::RetestWindow(_) => DetectionPhase::RetestWindow,
            State::CandidateReady { .. } => DetectionPhase::CandidateReady,
        }
    }

    pub fn candidate(&self) -> Option<&CandidateSetup> {
        match &self.state {
            State::CandidateReady { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&BosContext> {
        match &self.state {
            State::BosDetected(ctx) | State::RetestWindow(ctx) => Some(ctx),
            State::CandidateReady { context, .. } => Some(context),
            State::None => None,
        }
    }

    fn direction(&self) -> Option<Bias> {
        self.context().map(|c| c.direction)
    }

    pub fn details(&self, structure: &StructureSummary) -> PriceActionDetails {
        PriceActionDetails {
            phase: self.phase(),
            structural_level: self.context().map(|c| c.structural_level),
            retracement_percent: self.last_retracement,
            last_swing_high: structure.last_swing_high,
            last_swing_low: structure.last_swing_low,
        }
    }
}

impl Default for PriceActionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// |close − level| / level, in percent.
fn retracement_percent(close: f64, level: f64) -> f64 {
    ((close - level).abs() / level) * 100.0
}

/// Price closing beyond the most recent relevant swing extreme by more than
/// the buffer arms a structural level.
fn detect_bos(
    candle: &Candle,
    structure: &StructureSummary,
    bias: Bias,
    settings: &StrategySettings,
) -> Option<BosContext> {
    let (level, broke) = match bias {
        Bias::Bullish => {
            let high = structure.last_swing_high?;
            (high, candle.close > high + settings.bos_buffer_points)
        }
        Bias::Bearish => {
            let low = structure.last_swing_low?;
            (low, candle.close < low - settings.bos_buffer_points)
        }
        Bias::Neutral => return None,
    };
    if !broke {
        return None;
    }

    let step = settings.strike_step_points;
    let atm_strike = (candle.close / step).round() * step;
    // 2nd-OTM strike of the traded side: calls above for bullish, puts below
    // for bearish.
    let strike_price = match bias {
        Bias::Bullish => atm_strike + 2.0 * step,
        _ => atm_strike - 2.0 * step,
    };

    Some(BosContext {
        direction: bias,
        structural_level: level,
        bos_body_ratio: candle.body_ratio(),
        atm_strike,
        strike_price,
        detected_at: candle.timestamp,
    })
}
