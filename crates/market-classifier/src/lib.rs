//! Layer 1 and Layer 2 classifiers: session bias and market regime.
//!
//! Both are pure functions of the structure summary, the smoothed Greeks and
//! the current settings, re-evaluated on every tick. They return full
//! per-condition assessments, not just verdicts, so the decision logic and
//! the diagnostics output share one evaluation.

pub mod bias;
pub mod regime;

pub use bias::classify_bias;
pub use regime::classify_regime;
