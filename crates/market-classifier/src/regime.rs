use signal_core::{
    ConditionCheck, ConditionStatus, MarketRegime, RegimeAssessment, SmoothedGreeks,
    StrategySettings,
};
use structure_tracker::StructureSummary;

fn check(
    name: &str,
    value: Option<f64>,
    threshold: Option<f64>,
    predicate: impl FnOnce(f64) -> bool,
) -> ConditionCheck {
    ConditionCheck::new(name, ConditionStatus::check(value, predicate), value, threshold)
}

/// Layer 2: market regime.
///
/// Trendy and Volatile each require all of their conditions; the ATR bands
/// make them mutually exclusive by construction. Neutral is the fallback and
/// never needs positive proof.
pub fn classify_regime(
    structure: &StructureSummary,
    greeks: Option<&SmoothedGreeks>,
    settings: &StrategySettings,
) -> RegimeAssessment {
    let atr = structure.atr_14;
    let body_ratio = structure.body_ratio;
    let stability = greeks.and_then(|g| g.delta_stability);
    let gamma_change = greeks.and_then(|g| g.gamma_change_percent);
    let iv_trend = greeks.map(|g| g.iv_trend);

    let trendy = vec![
        check(
            "atr_in_trendy_band",
            atr,
            Some(settings.atr_trendy_max),
            |v| v >= settings.atr_trendy_min && v <= settings.atr_trendy_max,
        ),
        check(
            "decisive_candle_bodies",
            body_ratio,
            Some(settings.trendy_body_ratio_min),
            |v| v >= settings.trendy_body_ratio_min,
        ),
        check(
            "delta_stable",
            stability,
            Some(settings.delta_stability_ceiling),
            |v| v < settings.delta_stability_ceiling,
        ),
        check(
            "gamma_expanding",
            gamma_change,
            Some(settings.gamma_trendy_min),
            |v| v >= settings.gamma_trendy_min,
        ),
        check("iv_not_fading", iv_trend, Some(0.0), |v| v >= 0.0),
    ];

    let volatile = vec![
        check(
            "atr_above_trendy_band",
            atr,
            Some(settings.atr_trendy_max),
            |v| v > settings.atr_trendy_max,
        ),
        check(
            "indecisive_candle_bodies",
            body_ratio,
            Some(settings.volatile_body_ratio_max),
            |v| v >= settings.volatile_body_ratio_min && v < settings.volatile_body_ratio_max,
        ),
        check(
            "delta_unstable",
            stability,
            Some(settings.delta_stability_floor),
            |v| v > settings.delta_stability_floor,
        ),
        check(
            "gamma_surging",
            gamma_change,
            Some(settings.gamma_volatile_min),
            |v| v > settings.gamma_volatile_min,
        ),
        check(
            "iv_climbing",
            iv_trend,
            Some(settings.iv_volatile_min),
            |v| v > settings.iv_volatile_min,
        ),
    ];

    let assessment = RegimeAssessment {
        regime: MarketRegime::Neutral,
        trendy,
        volatile,
    };
    let regime = if assessment.trendy_holds() {
        MarketRegime::Trendy
    } else if assessment.volatile_holds() {
        MarketRegime::Volatile
    } else {
        MarketRegime::Neutral
    };

    RegimeAssessment { regime, ..assessment }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(atr: f64, body_ratio: f64) -> StructureSummary {
        StructureSummary {
            latest_price: Some(22_500.0),
            ema_20: Some(22_480.0),
            atr_14: Some(atr),
            body_ratio: Some(body_ratio),
            ..Default::default()
        }
    }

    fn greeks(stability: f64, gamma_change: f64, iv_trend: f64) -> SmoothedGreeks {
        SmoothedGreeks {
            delta_slope: 0.01,
            gamma_change_percent: Some(gamma_change),
            theta_change_percent: Some(0.0),
            iv_trend,
            delta_stability: Some(stability),
            window_samples: 5,
        }
    }

    #[test]
    fn textbook_trendy_tape() {
        let settings = StrategySettings::default();
        let g = greeks(0.01, 5.0, 0.5);
        let assessment = classify_regime(&structure(14.0, 0.7), Some(&g), &settings);
        assert_eq!(assessment.regime, MarketRegime::Trendy);
        assert!(assessment.trendy.iter().all(|c| c.status.passed()));
    }

    #[test]
    fn textbook_volatile_tape() {
        let settings = StrategySettings::default();
        let g = greeks(0.05, 12.0, 3.0);
        let assessment = classify_regime(&structure(22.0, 0.45), Some(&g), &settings);
        assert_eq!(assessment.regime, MarketRegime::Volatile);
        assert!(assessment.volatile.iter().all(|c| c.status.passed()));
    }

    #[test]
    fn atr_bands_cannot_satisfy_both_regimes() {
        let settings = StrategySettings::default();
        for atr in [5.0, 14.0, 18.0, 22.0, 40.0] {
            let g = greeks(0.02, 6.0, 1.0);
            let assessment = classify_regime(&structure(atr, 0.5), Some(&g), &settings);
            assert!(
                !(assessment.trendy_holds() && assessment.volatile_holds()),
                "atr {atr} satisfied both regimes"
            );
        }
    }

    #[test]
    fn quiet_tape_falls_back_to_neutral() {
        let settings = StrategySettings::default();
        let g = greeks(0.001, 0.5, -0.2);
        let assessment = classify_regime(&structure(6.0, 0.2), Some(&g), &settings);
        assert_eq!(assessment.regime, MarketRegime::Neutral);
    }

    #[test]
    fn cold_greek_window_is_neutral_with_indeterminate_conditions() {
        let settings = StrategySettings::default();
        let assessment = classify_regime(&structure(14.0, 0.7), None, &settings);
        assert_eq!(assessment.regime, MarketRegime::Neutral);
        assert_eq!(assessment.trendy[2].status, ConditionStatus::Indeterminate);
        assert_eq!(assessment.trendy[3].status, ConditionStatus::Indeterminate);
    }
}
