use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::SignalError;

/// Strategy thresholds, re-read by the pipeline on every tick.
///
/// Every field is addressable by its snake_case key through [`update`] /
/// [`get`], so the settings surface stays a flat key-value mapping to the
/// outside while the core works with typed fields.
///
/// [`update`]: StrategySettings::update
/// [`get`]: StrategySettings::get
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    // Trade management
    pub risk_reward_ratio: f64,
    pub risk_percent: f64,
    pub cooldown_minutes: f64,
    pub eod_exit_minutes: f64,

    // Price action
    pub bos_buffer_points: f64,
    pub retest_min_percent: f64,
    pub retest_max_percent: f64,
    pub strike_step_points: f64,

    // Layer 1 bias thresholds
    pub confirm_delta_slope: f64,
    pub confirm_gamma_change: f64,
    pub confirm_iv_trend: f64,

    // Layer 2 regime bounds
    pub atr_neutral_max: f64,
    pub atr_trendy_min: f64,
    pub atr_trendy_max: f64,
    pub trendy_body_ratio_min: f64,
    pub volatile_body_ratio_min: f64,
    pub volatile_body_ratio_max: f64,
    pub delta_stability_ceiling: f64,
    pub delta_stability_floor: f64,
    pub gamma_trendy_min: f64,
    pub gamma_volatile_min: f64,
    pub iv_volatile_min: f64,

    // Layer 4 confirmation
    pub cont_delta_thresh: f64,
    pub cont_gamma_thresh: f64,
    pub cont_iv_thresh: f64,
    pub cont_theta_thresh: f64,
    pub cont_conditions_met: usize,
    pub breakout_conditions_met: usize,
    pub rev_delta_flip_thresh: f64,
    pub rev_gamma_drop_thresh: f64,
    pub rev_iv_drop_thresh: f64,
    pub rev_conditions_met: usize,
    pub confirm_timeout_minutes: f64,

    // Emergency exits
    pub exit_iv_crush_thresh: f64,
    pub exit_delta_flip_thresh: f64,
    pub exit_gamma_drop_thresh: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            risk_reward_ratio: 2.0,
            risk_percent: 1.0,
            cooldown_minutes: 15.0,
            eod_exit_minutes: 60.0,

            bos_buffer_points: 10.0,
            retest_min_percent: 30.0,
            retest_max_percent: 60.0,
            strike_step_points: 50.0,

            confirm_delta_slope: 0.01,
            confirm_gamma_change: 5.0,
            confirm_iv_trend: 0.0,

            atr_neutral_max: 10.0,
            atr_trendy_min: 10.0,
            atr_trendy_max: 18.0,
            trendy_body_ratio_min: 0.6,
            volatile_body_ratio_min: 0.3,
            volatile_body_ratio_max: 0.6,
            delta_stability_ceiling: 0.015,
            delta_stability_floor: 0.04,
            gamma_trendy_min: 3.0,
            gamma_volatile_min: 10.0,
            iv_volatile_min: 2.0,

            cont_delta_thresh: 0.01,
            cont_gamma_thresh: 5.0,
            cont_iv_thresh: 0.5,
            cont_theta_thresh: 5.0,
            cont_conditions_met: 3,
            breakout_conditions_met: 2,
            rev_delta_flip_thresh: 0.01,
            rev_gamma_drop_thresh: -5.0,
            rev_iv_drop_thresh: -0.5,
            rev_conditions_met: 2,
            confirm_timeout_minutes: 15.0,

            exit_iv_crush_thresh: -2.0,
            exit_delta_flip_thresh: 0.01,
            exit_gamma_drop_thresh: -30.0,
        }
    }
}

fn invalid(key: &str, constraint: &str, value: f64) -> SignalError {
    SignalError::InvalidSettingsValue {
        key: key.to_string(),
        constraint: constraint.to_string(),
        value,
    }
}

fn ensure(ok: bool, key: &str, constraint: &str, value: f64) -> Result<(), SignalError> {
    if ok {
        Ok(())
    } else {
        Err(invalid(key, constraint, value))
    }
}

/// Vote minimums arrive as numbers; they must be whole and inside the
/// condition count for the setup type.
fn as_count(key: &str, value: f64, max: usize) -> Result<usize, SignalError> {
    ensure(
        value.fract() == 0.0 && value >= 1.0 && value <= max as f64,
        key,
        &format!("must be an integer in 1..={max}"),
        value,
    )?;
    Ok(value as usize)
}

impl StrategySettings {
    /// Validated single-key update. On failure the prior value is retained
    /// and the error names the key and the violated constraint.
    pub fn update(&mut self, key: &str, value: f64) -> Result<(), SignalError> {
        let mut next = self.clone();
        next.set_raw(key, value)?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Bulk ingestion of an external key-value mapping. Unknown keys are
    /// ignored with a warning; any invalid value rejects the whole batch and
    /// leaves the current settings untouched.
    pub fn apply_map(&mut self, map: &HashMap<String, f64>) -> Result<(), SignalError> {
        let mut next = self.clone();
        for (key, &value) in map {
            match next.set_raw(key, value) {
                Ok(()) => {}
                Err(SignalError::UnknownSettingsKey(k)) => {
                    warn!(key = %k, "ignoring unknown settings key");
                }
                Err(e) => return Err(e),
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Read a value back by key. `None` for unrecognized keys.
    pub fn get(&self, key: &str) -> Option<f64> {
        let value = match key {
            "risk_reward_ratio" => self.risk_reward_ratio,
            "risk_percent" => self.risk_percent,
            "cooldown_minutes" => self.cooldown_minutes,
            "eod_exit_minutes" => self.eod_exit_minutes,
            "bos_buffer_points" => self.bos_buffer_points,
            "retest_min_percent" => self.retest_min_percent,
            "retest_max_percent" => self.retest_max_percent,
            "strike_step_points" => self.strike_step_points,
            "confirm_delta_slope" => self.confirm_delta_slope,
            "confirm_gamma_change" => self.confirm_gamma_change,
            "confirm_iv_trend" => self.confirm_iv_trend,
            "atr_neutral_max" => self.atr_neutral_max,
            "atr_trendy_min" => self.atr_trendy_min,
            "atr_trendy_max" => self.atr_trendy_max,
            "trendy_body_ratio_min" => self.trendy_body_ratio_min,
            "volatile_body_ratio_min" => self.volatile_body_ratio_min,
            "volatile_body_ratio_max" => self.volatile_body_ratio_max,
            "delta_stability_ceiling" => self.delta_stability_ceiling,
            "delta_stability_floor" => self.delta_stability_floor,
            "gamma_trendy_min" => self.gamma_trendy_min,
            "gamma_volatile_min" => self.gamma_volatile_min,
            "iv_volatile_min" => self.iv_volatile_min,
            "cont_delta_thresh" => self.cont_delta_thresh,
            "cont_gamma_thresh" => self.cont_gamma_thresh,
            "cont_iv_thresh" => self.cont_iv_thresh,
            "cont_theta_thresh" => self.cont_theta_thresh,
            "cont_conditions_met" => self.cont_conditions_met as f64,
            "breakout_conditions_met" => self.breakout_conditions_met as f64,
            "rev_delta_flip_thresh" => self.rev_delta_flip_thresh,
            "rev_gamma_drop_thresh" => self.rev_gamma_drop_thresh,
            "rev_iv_drop_thresh" => self.rev_iv_drop_thresh,
            "rev_conditions_met" => self.rev_conditions_met as f64,
            "confirm_timeout_minutes" => self.confirm_timeout_minutes,
            "exit_iv_crush_thresh" => self.exit_iv_crush_thresh,
            "exit_delta_flip_thresh" => self.exit_delta_flip_thresh,
            "exit_gamma_drop_thresh" => self.exit_gamma_drop_thresh,
            _ => return None,
        };
        Some(value)
    }

    /// Per-key domain check and assignment. Cross-field constraints are
    /// deferred to [`validate`](StrategySettings::validate) so that batch
    /// updates are order-independent.
    fn set_raw(&mut self, key: &str, value: f64) -> Result<(), SignalError> {
        if !value.is_finite() {
            return Err(invalid(key, "must be a finite number", value));
        }
        match key {
            "risk_reward_ratio" => {
                ensure(value > 0.0, key, "must be > 0", value)?;
                self.risk_reward_ratio = value;
            }
            "risk_percent" => {
                ensure(value > 0.0 && value <= 100.0, key, "must be in (0, 100]", value)?;
                self.risk_percent = value;
            }
            "cooldown_minutes" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.cooldown_minutes = value;
            }
            "eod_exit_minutes" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.eod_exit_minutes = value;
            }
            "bos_buffer_points" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.bos_buffer_points = value;
            }
            "retest_min_percent" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.retest_min_percent = value;
            }
            "retest_max_percent" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.retest_max_percent = value;
            }
            "strike_step_points" => {
                ensure(value > 0.0, key, "must be > 0", value)?;
                self.strike_step_points = value;
            }
            "confirm_delta_slope" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.confirm_delta_slope = value;
            }
            "confirm_gamma_change" => self.confirm_gamma_change = value,
            "confirm_iv_trend" => self.confirm_iv_trend = value,
            "atr_neutral_max" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.atr_neutral_max = value;
            }
            "atr_trendy_min" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.atr_trendy_min = value;
            }
            "atr_trendy_max" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.atr_trendy_max = value;
            }
            "trendy_body_ratio_min" => {
                ensure((0.0..=1.0).contains(&value), key, "must be in [0, 1]", value)?;
                self.trendy_body_ratio_min = value;
            }
            "volatile_body_ratio_min" => {
                ensure((0.0..=1.0).contains(&value), key, "must be in [0, 1]", value)?;
                self.volatile_body_ratio_min = value;
            }
            "volatile_body_ratio_max" => {
                ensure((0.0..=1.0).contains(&value), key, "must be in [0, 1]", value)?;
                self.volatile_body_ratio_max = value;
            }
            "delta_stability_ceiling" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.delta_stability_ceiling = value;
            }
            "delta_stability_floor" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.delta_stability_floor = value;
            }
            "gamma_trendy_min" => self.gamma_trendy_min = value,
            "gamma_volatile_min" => self.gamma_volatile_min = value,
            "iv_volatile_min" => self.iv_volatile_min = value,
            "cont_delta_thresh" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.cont_delta_thresh = value;
            }
            "cont_gamma_thresh" => self.cont_gamma_thresh = value,
            "cont_iv_thresh" => self.cont_iv_thresh = value,
            "cont_theta_thresh" => self.cont_theta_thresh = value,
            "cont_conditions_met" => {
                self.cont_conditions_met = as_count(key, value, 4)?;
            }
            "breakout_conditions_met" => {
                self.breakout_conditions_met = as_count(key, value, 4)?;
            }
            "rev_delta_flip_thresh" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.rev_delta_flip_thresh = value;
            }
            "rev_gamma_drop_thresh" => self.rev_gamma_drop_thresh = value,
            "rev_iv_drop_thresh" => self.rev_iv_drop_thresh = value,
            "rev_conditions_met" => {
                self.rev_conditions_met = as_count(key, value, 3)?;
            }
            "confirm_timeout_minutes" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.confirm_timeout_minutes = value;
            }
            "exit_iv_crush_thresh" => {
                ensure(value <= 0.0, key, "must be <= 0", value)?;
                self.exit_iv_crush_thresh = value;
            }
            "exit_delta_flip_thresh" => {
                ensure(value >= 0.0, key, "must be >= 0", value)?;
                self.exit_delta_flip_thresh = value;
            }
            "exit_gamma_drop_thresh" => {
                ensure(value <= 0.0, key, "must be <= 0", value)?;
                self.exit_gamma_drop_thresh = value;
            }
            _ => return Err(SignalError::UnknownSettingsKey(key.to_string())),
        }
        Ok(())
    }

    /// Cross-field bounds that single-key checks cannot see.
    pub fn validate(&self) -> Result<(), SignalError> {
        ensure(
            self.retest_min_percent < self.retest_max_percent,
            "retest_min_percent",
            "must be < retest_max_percent",
            self.retest_min_percent,
        )?;
        ensure(
            self.atr_trendy_min < self.atr_trendy_max,
            "atr_trendy_min",
            "must be < atr_trendy_max",
            self.atr_trendy_min,
        )?;
        ensure(
            self.volatile_body_ratio_min < self.volatile_body_ratio_max,
            "volatile_body_ratio_min",
            "must be < volatile_body_ratio_max",
            self.volatile_body_ratio_min,
        )?;
        Ok(())
    }
}
