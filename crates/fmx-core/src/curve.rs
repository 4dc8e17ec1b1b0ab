//! Fade Curves
//!
//! Easing shapes for volume and parameter ramps. All curves map `t` in
//! `[0, 1]` onto `[0, 1]`, start at 0, end at 1 and are monotonic.

use serde::{Deserialize, Serialize};
use std::f32::consts::{E, FRAC_PI_2};

/// Easing curve applied to a ramp's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Constant rate
    #[default]
    Linear,
    /// Fast start, slow end: `ln(1 + 3t) / ln 4`
    Log,
    /// Quarter sine: `sin(t * π/2)`
    Sine,
    /// Slow edges, fast middle (cubic in-out)
    SCurve,
    /// Slow start, fast end: `(e^3t - 1) / (e^3 - 1)`
    Exp,
}

impl FadeCurve {
    /// Evaluate curve at position t (clamped to 0.0 - 1.0)
    #[inline]
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Log => (1.0 + t * 3.0).ln() / 4.0_f32.ln(),
            FadeCurve::Sine => (t * FRAC_PI_2).sin(),
            FadeCurve::SCurve => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            FadeCurve::Exp => (E.powf(t * 3.0) - 1.0) / (E.powi(3) - 1.0),
        }
    }

    /// Value between `from` and `to` at progress `t`
    #[inline]
    pub fn interpolate(&self, from: f32, to: f32, t: f32) -> f32 {
        let k = self.evaluate(t);
        from + (to - from) * k
    }

    pub fn name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::Log => "Log",
            FadeCurve::Sine => "Sine",
            FadeCurve::SCurve => "SCurve",
            FadeCurve::Exp => "Exp",
        }
    }
}
