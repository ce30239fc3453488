//! Time-windowed smoothing of raw Greek snapshots for the tracked strike.
//!
//! Raw delta/gamma/theta/IV readings are noisy at the 10-second cadence the
//! feed delivers them; every classifier downstream consumes rates of change
//! across a trailing window instead of point values.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use signal_core::{GreekSnapshot, SignalError, SmoothedGreeks};
use statrs::statistics::Statistics;

/// Primary smoothing window.
const WINDOW_SECS: i64 = 30;

/// Secondary lookback for delta stability, consumed only by the regime
/// classifier.
const STABILITY_WINDOW_SECS: i64 = 120;

/// Samples required before a standard deviation is reported.
const MIN_STABILITY_SAMPLES: usize = 5;

/// Maintains the trailing snapshot buffer and derives smoothed rates.
///
/// Ticks whose timestamp does not strictly advance past the previously
/// accepted one are rejected and leave the buffer untouched.
#[derive(Debug, Default)]
pub struct GreekSmoother {
    buffer: VecDeque<GreekSnapshot>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl GreekSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one raw snapshot, evicting samples that fell out of the
    /// stability window.
    pub fn push(&mut self, snapshot: GreekSnapshot) -> Result<(), SignalError> {
        if let Some(previous) = self.last_timestamp {
            if snapshot.timestamp <= previous {
                return Err(SignalError::OutOfOrderTick {
                    previous,
                    received: snapshot.timestamp,
                });
            }
        }
        self.last_timestamp = Some(snapshot.timestamp);

        let horizon = snapshot.timestamp - Duration::seconds(STABILITY_WINDOW_SECS);
        self.buffer.push_back(snapshot);
        while let Some(front) = self.buffer.front() {
            if front.timestamp < horizon {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Most recent accepted snapshot.
    pub fn latest(&self) -> Option<&GreekSnapshot> {
        self.buffer.back()
    }

    /// Last traded premium of the tracked strike, when the feed carried one.
    pub fn latest_premium(&self) -> Option<f64> {
        self.buffer.back().and_then(|s| s.premium)
    }

    /// Smoothed rates over the primary window. `None` until the window
    /// holds at least two samples.
    pub fn smoothed(&self) -> Option<SmoothedGreeks> {
        let latest = self.buffer.back()?;
        let window_start = latest.timestamp - Duration::seconds(WINDOW_SECS);

        let window: Vec<&GreekSnapshot> = self
            .buffer
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .collect();
        if window.len() < 2 {
            return None;
        }
        let earliest = window[0];

        let delta_slope = (latest.delta - earliest.delta) / WINDOW_SECS as f64;
        let gamma_change_percent = percent_change(earliest.gamma, latest.gamma);
        let theta_change_percent = percent_change(earliest.theta, latest.theta);
        let iv_trend = latest.iv - earliest.iv;

        let delta_stability = if self.buffer.len() >= MIN_STABILITY_SAMPLES {
            let deltas: Vec<f64> = self.buffer.iter().map(|s| s.delta).collect();
            Some(deltas.population_std_dev())
        } else {
            None
        };

        Some(SmoothedGreeks {
            delta_slope,
            gamma_change_percent,
            theta_change_percent,
            iv_trend,
            delta_stability,
            window_samples: window.len(),
        })
    }
}

/// Percent change across the window. Undefined (not zero) when the base is 0.
fn percent_change(earliest: f64, latest: f64) -> Option<f64> {
    if earliest == 0.0 {
        None
    } else {
        Some((latest - earliest) / earliest * 100.0)
    }
}
