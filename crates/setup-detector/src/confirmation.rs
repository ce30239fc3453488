use signal_core::{
    Bias, CandidateSetup, ConditionCheck, ConditionStatus, ConfirmationAssessment, SetupType,
    SmoothedGreeks, StrategySettings,
};
use tracing::debug;

/// A breakout entry needs the BOS candle itself to have been decisive.
const BREAKOUT_BODY_RATIO_MIN: f64 = 0.6;

fn check(
    name: &str,
    value: Option<f64>,
    threshold: f64,
    predicate: impl FnOnce(f64) -> bool,
) -> ConditionCheck {
    ConditionCheck::new(name, ConditionStatus::check(value, predicate), value, Some(threshold))
}

/// Layer 4: vote the candidate's Greek conditions and decide entry approval.
///
/// Conditions are written for a bullish candidate; a bearish one sees its
/// delta slope sign-flipped so the same thresholds apply. Indeterminate
/// conditions (cold or missing Greek window) are not votes in either
/// direction, so a cold window can only ever defer an entry, not force one.
pub fn confirm_candidate(
    candidate: &CandidateSetup,
    greeks: Option<&SmoothedGreeks>,
    bos_body_ratio: Option<f64>,
    settings: &StrategySettings,
) -> ConfirmationAssessment {
    let sign = match candidate.bias {
        Bias::Bearish => -1.0,
        _ => 1.0,
    };
    // Slope measured along the trade's direction.
    let directional_slope = greeks.map(|g| g.delta_slope * sign);
    let gamma_change = greeks.and_then(|g| g.gamma_change_percent);
    let theta_change = greeks.and_then(|g| g.theta_change_percent);
    let iv_trend = greeks.map(|g| g.iv_trend);

    let (conditions, required) = match candidate.setup_type {
        SetupType::Continuation => (
            vec![
                check(
                    "delta_with_trend",
                    directional_slope,
                    settings.cont_delta_thresh,
                    |v| v >= settings.cont_delta_thresh,
                ),
                check(
                    "gamma_building",
                    gamma_change,
                    settings.cont_gamma_thresh,
                    |v| v >= settings.cont_gamma_thresh,
                ),
                check("iv_rising", iv_trend, settings.cont_iv_thresh, |v| {
                    v >= settings.cont_iv_thresh
                }),
                check(
                    "theta_contained",
                    theta_change,
                    settings.cont_theta_thresh,
                    |v| v <= settings.cont_theta_thresh,
                ),
            ],
            settings.cont_conditions_met,
        ),
        SetupType::Breakout => (
            vec![
                check(
                    "delta_accelerating",
                    directional_slope,
                    settings.confirm_delta_slope,
                    |v| v >= settings.confirm_delta_slope,
                ),
                check(
                    "gamma_expanding",
                    gamma_change,
                    settings.confirm_gamma_change,
                    |v| v >= settings.confirm_gamma_change,
                ),
                check("iv_supportive", iv_trend, settings.confirm_iv_trend, |v| {
                    v >= settings.confirm_iv_trend
                }),
                check(
                    "decisive_bos_candle",
                    bos_body_ratio,
                    BREAKOUT_BODY_RATIO_MIN,
                    |v| v >= BREAKOUT_BODY_RATIO_MIN,
                ),
            ],
            settings.breakout_conditions_met,
        ),
        // Reversal trades want the Greeks turning against the broken
        // direction.
        SetupType::Reversal => (
            vec![
                check(
                    "delta_flipped",
                    directional_slope,
                    -settings.rev_delta_flip_thresh,
                    |v| v <= -settings.rev_delta_flip_thresh,
                ),
                check(
                    "gamma_dropping",
                    gamma_change,
                    settings.rev_gamma_drop_thresh,
                    |v| v <= settings.rev_gamma_drop_thresh,
                ),
                check("iv_dropping", iv_trend, settings.rev_iv_drop_thresh, |v| {
                    v <= settings.rev_iv_drop_thresh
                }),
            ],
            settings.rev_conditions_met,
        ),
    };

    let passed = conditions.iter().filter(|c| c.status.passed()).count();
    let approved = passed >= required;
    debug!(
        setup = candidate.setup_type.name(),
        passed, required, approved, "confirmation vote"
    );

    ConfirmationAssessment {
        setup_type: candidate.setup_type,
        conditions,
        passed,
        required,
        approved,
    }
}
