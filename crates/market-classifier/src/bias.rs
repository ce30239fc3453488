use signal_core::{
    Bias, BiasAssessment, ConditionCheck, ConditionStatus, SmoothedGreeks, StrategySettings,
};
use structure_tracker::StructureSummary;

/// True when `prices` holds three strictly increasing values, oldest first.
/// `None` when fewer than three swings exist yet.
fn strictly_increasing(prices: &[f64]) -> Option<bool> {
    if prices.len() < 3 {
        return None;
    }
    Some(prices.windows(2).all(|w| w[1] > w[0]))
}

fn strictly_decreasing(prices: &[f64]) -> Option<bool> {
    if prices.len() < 3 {
        return None;
    }
    Some(prices.windows(2).all(|w| w[1] < w[0]))
}

fn swing_check(name: &str, prices: &[f64], increasing: bool) -> ConditionCheck {
    let verdict = if increasing {
        strictly_increasing(prices)
    } else {
        strictly_decreasing(prices)
    };
    let status = match verdict {
        Some(pass) => ConditionStatus::from_bool(pass),
        None => ConditionStatus::Indeterminate,
    };
    ConditionCheck::new(name, status, prices.last().copied(), None)
}

fn price_vs_ema(name: &str, structure: &StructureSummary, above: bool) -> ConditionCheck {
    let status = match (structure.latest_price, structure.ema_20) {
        (Some(price), Some(ema)) => {
            ConditionStatus::from_bool(if above { price > ema } else { price < ema })
        }
        _ => ConditionStatus::Indeterminate,
    };
    ConditionCheck::new(name, status, structure.latest_price, structure.ema_20)
}

fn greek_check(
    name: &str,
    value: Option<f64>,
    threshold: f64,
    at_least: bool,
) -> ConditionCheck {
    let status = ConditionStatus::check(value, |v| {
        if at_least {
            v >= threshold
        } else {
            v <= threshold
        }
    });
    ConditionCheck::new(name, status, value, Some(threshold))
}

/// Layer 1: session-wide bias.
///
/// Bullish requires every bullish condition to hold; Bearish is the strict
/// mirror; anything else is Neutral. Indeterminate conditions (not enough
/// swings, cold EMA, cold Greek window) can never satisfy either side.
pub fn classify_bias(
    structure: &StructureSummary,
    greeks: Option<&SmoothedGreeks>,
    settings: &StrategySettings,
) -> BiasAssessment {
    let delta_slope = greeks.map(|g| g.delta_slope);
    let gamma_change = greeks.and_then(|g| g.gamma_change_percent);
    let iv_trend = greeks.map(|g| g.iv_trend);

    let bullish = vec![
        swing_check("higher_highs", &structure.swing_highs, true),
        swing_check("higher_lows", &structure.swing_lows, true),
        price_vs_ema("price_above_ema", structure, true),
        greek_check("delta_rising", delta_slope, settings.confirm_delta_slope, true),
        greek_check(
            "gamma_expanding",
            gamma_change,
            settings.confirm_gamma_change,
            true,
        ),
        greek_check("iv_supportive", iv_trend, settings.confirm_iv_trend, true),
    ];

    let bearish = vec![
        swing_check("lower_highs", &structure.swing_highs, false),
        swing_check("lower_lows", &structure.swing_lows, false),
        price_vs_ema("price_below_ema", structure, false),
        greek_check(
            "delta_falling",
            delta_slope,
            -settings.confirm_delta_slope,
            false,
        ),
        greek_check(
            "gamma_contracting",
            gamma_change,
            -settings.confirm_gamma_change,
            false,
        ),
        greek_check("iv_fading", iv_trend, -settings.confirm_iv_trend, false),
    ];

    let assessment = BiasAssessment {
        bias: Bias::Neutral,
        bullish,
        bearish,
    };
    let bias = if assessment.bullish_holds() {
        Bias::Bullish
    } else if assessment.bearish_holds() {
        Bias::Bearish
    } else {
        Bias::Neutral
    };

    BiasAssessment { bias, ..assessment }
}
