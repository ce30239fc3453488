//! Trade lifecycle: candidate intake, entry sizing, exit monitoring and the
//! post-trade cooldown. One `SetupLifecycle` per session.

use chrono::{DateTime, Duration, Utc};
use signal_core::{
    ActiveTrade, CandidateSetup, SetupStatus, SmoothedGreeks, StrategySettings, TradeLogEntry,
    TradeResult,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of an entry attempt on an approved candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Entered,
    /// No live option premium yet; the candidate stays pending.
    AwaitingPremium,
    /// No account size configured; the candidate stays pending.
    AwaitingAccountSize,
    /// There is no pending candidate to enter.
    NothingPending,
}

#[derive(Debug)]
enum LifecycleState {
    Idle,
    Candidate(CandidateSetup),
    Active {
        trade: ActiveTrade,
        last_premium: f64,
    },
    Cooldown {
        until: DateTime<Utc>,
    },
}

/// Forward-only state machine:
/// Idle → Candidate → Active → Cooldown → Idle.
///
/// Invalidations (bias flip, confirmation timeout) drop a candidate back to
/// Idle; an entered trade can only leave through an exit and its cooldown.
#[derive(Debug)]
pub struct SetupLifecycle {
    session_id: String,
    state: LifecycleState,
}

impl SetupLifecycle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: LifecycleState::Idle,
        }
    }

    /// True when a new candidate may be accepted at `now`. An elapsed
    /// cooldown counts as idle.
    pub fn can_accept(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            LifecycleState::Idle => true,
            LifecycleState::Cooldown { until } => now >= *until,
            _ => false,
        }
    }

    /// Take ownership of a freshly raised candidate. Returns false (and
    /// leaves state untouched) when a candidate or trade is already live or
    /// a cooldown is still running.
    pub fn accept_candidate(&mut self, candidate: CandidateSetup, now: DateTime<Utc>) -> bool {
        if !self.can_accept(now) {
            debug!(session = %self.session_id, "candidate rejected, lifecycle busy");
            return false;
        }
        info!(
            session = %self.session_id,
            setup = candidate.setup_type.name(),
            strike = candidate.strike_price,
            "candidate accepted"
        );
        self.state = LifecycleState::Candidate(candidate);
        true
    }

    /// Attempt entry on the pending candidate after confirmation approval.
    ///
    /// Entry needs a live premium and a configured account size; with either
    /// missing, the candidate stays pending and entry is retried on a later
    /// tick. Never opens a zero-sized trade.
    ///
    /// # Panics
    /// Panics if a trade is already active. Callers gate entry on the
    /// detector being idle while a trade runs, so a second entry is a
    /// programming error.
    pub fn try_enter(
        &mut self,
        now: DateTime<Utc>,
        premium: Option<f64>,
        account_size: Option<f64>,
        settings: &StrategySettings,
    ) -> EntryDecision {
        let candidate = match &self.state {
            LifecycleState::Candidate(c) => c.clone(),
            LifecycleState::Active { .. } => {
                panic!("entry attempted while a trade is already active")
            }
            _ => return EntryDecision::NothingPending,
        };

        let Some(entry_price) = premium else {
            debug!(session = %self.session_id, "entry deferred, no live premium");
            return EntryDecision::AwaitingPremium;
        };
        let Some(account_size) = account_size else {
            warn!(session = %self.session_id, "entry deferred, no account size configured");
            return EntryDecision::AwaitingAccountSize;
        };

        // Risk budget expressed in premium points.
        let distance = account_size * settings.risk_percent / 100.0;
        let mut candidate = candidate;
        candidate.status = SetupStatus::EntryApproved;
        let trade = ActiveTrade {
            stop_loss: entry_price - distance,
            target: entry_price + distance * settings.risk_reward_ratio,
            entry_price,
            opened_at: now,
            candidate,
        };
        info!(
            session = %self.session_id,
            entry = trade.entry_price,
            stop = trade.stop_loss,
            target = trade.target,
            "trade entered"
        );
        self.state = LifecycleState::Active {
            trade,
            last_premium: entry_price,
        };
        EntryDecision::Entered
    }

    /// Check the active trade against exit rules, highest severity first:
    /// Greek emergency, then stop/target, then the end-of-day flatten.
    /// Returns the log entry when the trade closed on this tick.
    pub fn on_tick(
        &mut self,
        now: DateTime<Utc>,
        premium: Option<f64>,
        greeks: Option<&SmoothedGreeks>,
        market_close: DateTime<Utc>,
        settings: &StrategySettings,
    ) -> Option<TradeLogEntry> {
        let LifecycleState::Active { trade, last_premium } = &mut self.state else {
            return None;
        };
        if let Some(p) = premium {
            *last_premium = p;
        }
        let mark = *last_premium;

        let result = exit_check(trade, mark, greeks, now, market_close, settings)?;

        let entry = TradeLogEntry {
            id: Uuid::new_v4(),
            session_id: self.session_id.clone(),
            timestamp: now,
            signal_type: trade.candidate.setup_type,
            bias: trade.candidate.bias,
            status: SetupStatus::Closed,
            strike_price: trade.candidate.strike_price,
            entry_price: trade.entry_price,
            stop_loss: trade.stop_loss,
            target: trade.target,
            exit_price: mark,
            result,
        };
        info!(
            session = %self.session_id,
            result = result.label(),
            exit = mark,
            pnl = mark - trade.entry_price,
            "trade closed"
        );

        let cooldown = Duration::seconds((settings.cooldown_minutes * 60.0) as i64);
        self.state = LifecycleState::Cooldown { until: now + cooldown };
        Some(entry)
    }

    /// Drop a pending candidate (bias flip, confirmation timeout). No-op in
    /// any other state.
    pub fn invalidate_candidate(&mut self) {
        if matches!(self.state, LifecycleState::Candidate(_)) {
            debug!(session = %self.session_id, "pending candidate invalidated");
            self.state = LifecycleState::Idle;
        }
    }

    pub fn candidate(&self) -> Option<&CandidateSetup> {
        match &self.state {
            LifecycleState::Candidate(c) => Some(c),
            _ => None,
        }
    }

    pub fn active_trade(&self) -> Option<&ActiveTrade> {
        match &self.state {
            LifecycleState::Active { trade, .. } => Some(trade),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, LifecycleState::Active { .. })
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            LifecycleState::Cooldown { until } => Some(*until),
            _ => None,
        }
    }
}

fn exit_check(
    trade: &ActiveTrade,
    mark: f64,
    greeks: Option<&SmoothedGreeks>,
    now: DateTime<Utc>,
    market_close: DateTime<Utc>,
    settings: &StrategySettings,
) -> Option<TradeResult> {
    if let Some(g) = greeks {
        if emergency(trade, g, settings) {
            return Some(TradeResult::EmergencyExit);
        }
    }
    if mark <= trade.stop_loss {
        return Some(TradeResult::StopLoss);
    }
    if mark >= trade.target {
        return Some(TradeResult::TargetHit);
    }
    let eod_cutoff =
        market_close - Duration::seconds((settings.eod_exit_minutes * 60.0) as i64);
    if now >= eod_cutoff {
        return Some(TradeResult::EodExit);
    }
    None
}

/// Greek deterioration severe enough to abandon the trade regardless of
/// price: IV crush, delta turning against the position, or gamma collapsing.
fn emergency(trade: &ActiveTrade, greeks: &SmoothedGreeks, settings: &StrategySettings) -> bool {
    if greeks.iv_trend <= settings.exit_iv_crush_thresh {
        return true;
    }
    let directional_slope = match trade.candidate.bias {
        signal_core::Bias::Bearish => -greeks.delta_slope,
        _ => greeks.delta_slope,
    };
    if directional_slope <= -settings.exit_delta_flip_thresh {
        return true;
    }
    matches!(greeks.gamma_change_percent, Some(g) if g <= settings.exit_gamma_drop_thresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use signal_core::{Bias, SetupType};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 10, minute, 0).unwrap()
    }

    fn market_close() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 15, 30, 0).unwrap()
    }

    fn candidate() -> CandidateSetup {
        CandidateSetup {
            setup_type: SetupType::Continuation,
            bias: Bias::Bullish,
            atm_strike: 22_650.0,
            strike_price: 22_750.0,
            structural_level: 22_600.0,
            status: SetupStatus::PendingConfirmation,
            created_at: at(0),
        }
    }

    fn calm_greeks() -> SmoothedGreeks {
        SmoothedGreeks {
            delta_slope: 0.01,
            gamma_change_percent: Some(2.0),
            theta_change_percent: Some(0.0),
            iv_trend: 0.2,
            delta_stability: Some(0.01),
            window_samples: 6,
        }
    }

    fn entered_lifecycle(settings: &StrategySettings) -> SetupLifecycle {
        let mut lifecycle = SetupLifecycle::new("nifty-1");
        assert!(lifecycle.accept_candidate(candidate(), at(0)));
        let decision = lifecycle.try_enter(at(1), Some(150.0), Some(2_000.0), settings);
        assert_eq!(decision, EntryDecision::Entered);
        lifecycle
    }

    #[test]
    fn entry_sizing_follows_account_risk() {
        let settings = StrategySettings::default();
        let lifecycle = entered_lifecycle(&settings);
        let trade = lifecycle.active_trade().unwrap();

        // 1% of 2000 = 20 premium points of risk, 2R target.
        assert_relative_eq!(trade.entry_price, 150.0);
        assert_relative_eq!(trade.stop_loss, 130.0);
        assert_relative_eq!(trade.target, 190.0);
        assert_eq!(trade.candidate.status, SetupStatus::EntryApproved);
    }

    #[test]
    fn entry_defers_without_premium_or_account() {
        let settings = StrategySettings::default();
        let mut lifecycle = SetupLifecycle::new("nifty-1");
        lifecycle.accept_candidate(candidate(), at(0));

        assert_eq!(
            lifecycle.try_enter(at(1), None, Some(2_000.0), &settings),
            EntryDecision::AwaitingPremium
        );
        assert_eq!(
            lifecycle.try_enter(at(1), Some(150.0), None, &settings),
            EntryDecision::AwaitingAccountSize
        );
        // Still pending, not lost.
        assert!(lifecycle.candidate().is_some());
        assert_eq!(
            lifecycle.try_enter(at(2), Some(150.0), Some(2_000.0), &settings),
            EntryDecision::Entered
        );
    }

    #[test]
    fn stop_loss_closes_and_starts_cooldown() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        let entry = lifecycle
            .on_tick(at(5), Some(129.0), Some(&calm_greeks()), market_close(), &settings)
            .expect("stop should close the trade");
        assert_eq!(entry.result, TradeResult::StopLoss);
        assert_eq!(entry.status, SetupStatus::Closed);
        assert_relative_eq!(entry.exit_price, 129.0);
        assert_eq!(entry.session_id, "nifty-1");

        // Cooldown blocks the next candidate until it elapses.
        assert!(!lifecycle.accept_candidate(candidate(), at(10)));
        assert!(lifecycle.accept_candidate(candidate(), at(21)));
    }

    #[test]
    fn target_hit_closes_the_trade() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        let entry = lifecycle
            .on_tick(at(5), Some(191.0), Some(&calm_greeks()), market_close(), &settings)
            .unwrap();
        assert_eq!(entry.result, TradeResult::TargetHit);
    }

    #[test]
    fn emergency_exit_outranks_target() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        let mut greeks = calm_greeks();
        greeks.iv_trend = -3.0;
        let entry = lifecycle
            .on_tick(at(5), Some(195.0), Some(&greeks), market_close(), &settings)
            .unwrap();
        assert_eq!(entry.result, TradeResult::EmergencyExit);
    }

    #[test]
    fn delta_flip_against_position_is_an_emergency() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        let mut greeks = calm_greeks();
        greeks.delta_slope = -0.02;
        let entry = lifecycle
            .on_tick(at(5), Some(150.0), Some(&greeks), market_close(), &settings)
            .unwrap();
        assert_eq!(entry.result, TradeResult::EmergencyExit);
    }

    #[test]
    fn eod_window_flattens_an_open_trade() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        // 14:31 IST-equivalent: inside the last hour before market close.
        let late = market_close() - Duration::minutes(59);
        let entry = lifecycle
            .on_tick(late, Some(155.0), Some(&calm_greeks()), market_close(), &settings)
            .unwrap();
        assert_eq!(entry.result, TradeResult::EodExit);
        assert_relative_eq!(entry.exit_price, 155.0);
    }

    #[test]
    fn missing_premium_tick_marks_at_last_known_price() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        // No premium on the EOD tick: the close is marked at the last seen
        // premium, which at entry is the entry price itself.
        let late = market_close() - Duration::minutes(10);
        let entry = lifecycle
            .on_tick(late, None, Some(&calm_greeks()), market_close(), &settings)
            .unwrap();
        assert_eq!(entry.result, TradeResult::EodExit);
        assert_relative_eq!(entry.exit_price, 150.0);
    }

    #[test]
    fn quiet_tick_keeps_the_trade_open() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);

        let closed = lifecycle.on_tick(
            at(5),
            Some(160.0),
            Some(&calm_greeks()),
            market_close(),
            &settings,
        );
        assert!(closed.is_none());
        assert!(lifecycle.is_active());
    }

    #[test]
    fn invalidation_only_touches_pending_candidates() {
        let settings = StrategySettings::default();
        let mut lifecycle = SetupLifecycle::new("nifty-1");
        lifecycle.accept_candidate(candidate(), at(0));
        lifecycle.invalidate_candidate();
        assert!(lifecycle.candidate().is_none());
        assert!(lifecycle.can_accept(at(1)));

        let mut lifecycle = entered_lifecycle(&settings);
        lifecycle.invalidate_candidate();
        assert!(lifecycle.is_active());
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn double_entry_panics() {
        let settings = StrategySettings::default();
        let mut lifecycle = entered_lifecycle(&settings);
        lifecycle.try_enter(at(2), Some(160.0), Some(2_000.0), &settings);
    }
}
