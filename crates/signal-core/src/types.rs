use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A closed OHLCV candle. Immutable once formed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Body-to-range ratio. Defined as 0 for a candle with no range.
    pub fn body_ratio(&self) -> f64 {
        let range = self.high - self.low;
        if range > 0.0 {
            (self.close - self.open).abs() / range
        } else {
            0.0
        }
    }
}

/// Kind of structural pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed local price pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Option Greeks for the tracked strike, sampled at one instant.
/// `premium` carries the strike's last traded price when the feed has one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GreekSnapshot {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub iv: f64,
    #[serde(default)]
    pub premium: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Smoothed Greek derivatives over the trailing window.
///
/// Percent-change fields are `None` when the window's earliest value is 0
/// (the ratio is undefined, not zero). `delta_stability` is `None` until the
/// secondary window holds enough samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothedGreeks {
    pub delta_slope: f64,
    pub gamma_change_percent: Option<f64>,
    pub theta_change_percent: Option<f64>,
    pub iv_trend: f64,
    pub delta_stability: Option<f64>,
    pub window_samples: usize,
}

/// Session-wide directional bias (Layer 1 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn name(&self) -> &'static str {
        match self {
            Bias::Bullish => "Bullish",
            Bias::Bearish => "Bearish",
            Bias::Neutral => "Neutral",
        }
    }

    /// The opposite directional bias. Neutral has no opposite.
    pub fn flipped(&self) -> Bias {
        match self {
            Bias::Bullish => Bias::Bearish,
            Bias::Bearish => Bias::Bullish,
            Bias::Neutral => Bias::Neutral,
        }
    }
}

/// Market regime classification (Layer 2 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Trendy,
    Volatile,
    Neutral,
}

impl MarketRegime {
    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::Trendy => "Trendy",
            MarketRegime::Volatile => "Volatile",
            MarketRegime::Neutral => "Neutral",
        }
    }
}

/// Trade setup archetype selected at retest time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupType {
    Continuation,
    Breakout,
    Reversal,
}

impl SetupType {
    pub fn name(&self) -> &'static str {
        match self {
            SetupType::Continuation => "Continuation",
            SetupType::Breakout => "Breakout",
            SetupType::Reversal => "Reversal",
        }
    }
}

/// Lifecycle status of a candidate setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupStatus {
    PendingConfirmation,
    EntryApproved,
    Closed,
}

/// Why an active trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    TargetHit,
    StopLoss,
    EmergencyExit,
    EodExit,
}

impl TradeResult {
    pub fn label(&self) -> &'static str {
        match self {
            TradeResult::TargetHit => "TARGET_HIT",
            TradeResult::StopLoss => "STOP_LOSS",
            TradeResult::EmergencyExit => "EMERGENCY_EXIT",
            TradeResult::EodExit => "EOD_EXIT",
        }
    }
}

/// A proposed trade awaiting Greek confirmation. At most one live instance
/// per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSetup {
    pub setup_type: SetupType,
    pub bias: Bias,
    pub atm_strike: f64,
    pub strike_price: f64,
    pub structural_level: f64,
    pub status: SetupStatus,
    pub created_at: DateTime<Utc>,
}

/// An entered trade. Exists only while the setup is ENTRY_APPROVED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub candidate: CandidateSetup,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub opened_at: DateTime<Utc>,
}

/// Append-only record written exactly once per closed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub id: Uuid,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub signal_type: SetupType,
    pub bias: Bias,
    pub status: SetupStatus,
    pub strike_price: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub exit_price: f64,
    pub result: TradeResult,
}

/// Tri-state outcome of a named condition. Insufficient history yields
/// `Indeterminate`, never `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    Pass,
    Fail,
    Indeterminate,
}

impl ConditionStatus {
    pub fn passed(&self) -> bool {
        matches!(self, ConditionStatus::Pass)
    }

    pub fn from_bool(pass: bool) -> Self {
        if pass {
            ConditionStatus::Pass
        } else {
            ConditionStatus::Fail
        }
    }

    /// Evaluate a predicate against an optional input.
    pub fn check(value: Option<f64>, predicate: impl FnOnce(f64) -> bool) -> Self {
        match value {
            Some(v) => Self::from_bool(predicate(v)),
            None => ConditionStatus::Indeterminate,
        }
    }
}

/// One evaluated condition, with the raw value and threshold it was judged
/// against so callers can render more than the verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionCheck {
    pub name: String,
    pub status: ConditionStatus,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

impl ConditionCheck {
    pub fn new(
        name: &str,
        status: ConditionStatus,
        value: Option<f64>,
        threshold: Option<f64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            status,
            value,
            threshold,
        }
    }
}

fn all_pass(conditions: &[ConditionCheck]) -> bool {
    conditions.iter().all(|c| c.status.passed())
}

/// Layer 1 verdict with both rule sets retained for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasAssessment {
    pub bias: Bias,
    pub bullish: Vec<ConditionCheck>,
    pub bearish: Vec<ConditionCheck>,
}

impl BiasAssessment {
    pub fn bullish_holds(&self) -> bool {
        all_pass(&self.bullish)
    }

    pub fn bearish_holds(&self) -> bool {
        all_pass(&self.bearish)
    }
}

/// Layer 2 verdict with both rule sets retained for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub regime: MarketRegime,
    pub trendy: Vec<ConditionCheck>,
    pub volatile: Vec<ConditionCheck>,
}

impl RegimeAssessment {
    pub fn trendy_holds(&self) -> bool {
        all_pass(&self.trendy)
    }

    pub fn volatile_holds(&self) -> bool {
        all_pass(&self.volatile)
    }
}

/// Layer 4 verdict: condition vote for a pending candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationAssessment {
    pub setup_type: SetupType,
    pub conditions: Vec<ConditionCheck>,
    pub passed: usize,
    pub required: usize,
    pub approved: bool,
}

/// Where the price-action detector currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionPhase {
    None,
    BosDetected,
    RetestWindow,
    CandidateReady,
}

/// Layer 3 diagnostics: detector phase plus the levels it is watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceActionDetails {
    pub phase: DetectionPhase,
    pub structural_level: Option<f64>,
    pub retracement_percent: Option<f64>,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}

/// Per-condition observability for the UI/transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub bias_details: BiasAssessment,
    pub market_type_details: RegimeAssessment,
    pub price_action_details: PriceActionDetails,
    pub greek_confirmation_details: Option<ConfirmationAssessment>,
}

/// Per-session status emitted after every accepted tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub bias: Bias,
    pub market_regime: MarketRegime,
    pub candidate_setup: Option<CandidateSetup>,
    pub diagnostics: Diagnostics,
}

/// One element of the ordered per-session input stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    CandleClose(Candle),
    Greeks(GreekSnapshot),
}

impl MarketEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::CandleClose(c) => c.timestamp,
            MarketEvent::Greeks(g) => g.timestamp,
        }
    }
}
