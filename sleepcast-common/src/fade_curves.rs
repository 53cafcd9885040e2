//! Fade curve implementations for gain ramps
//!
//! Both curves are complementary: for any position `t`,
//! `fade_in(t) + fade_out(t) == 1.0`. A crossfade built from a matching
//! fade-in/fade-out pair therefore never sums above the level of a single
//! source.

use serde::{Deserialize, Serialize};

/// Fade curve types for gain ramps and crossfades
///
/// - Linear: Constant rate of change (audio-context style linear ramp)
/// - SCurve: Smooth acceleration and deceleration, used for snippet edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    #[default]
    Linear,

    /// S-Curve: v(t) = 0.5 × (1 - cos(π × t))
    SCurve,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0), clamped
    ///
    /// # Returns
    /// Volume multiplier (0.0 = silence, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
        }
    }

    /// Calculate fade-out multiplier at given position
    ///
    /// Returns 1.0 at the start of the fade and 0.0 at its end.
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        1.0 - self.calculate_fade_in(position)
    }

    /// Interpolate between `from` and `to` at normalized `position`
    pub fn interpolate(&self, from: f32, to: f32, position: f32) -> f32 {
        from + (to - from) * self.calculate_fade_in(position)
    }

    /// Parse curve from a configuration string
    ///
    /// Accepts `linear`, and `s_curve` / `scurve` / `s-curve` / `cosine`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            _ => None,
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::SCurve => "S-Curve",
        }
    }

    /// Get all available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::Linear, FadeCurve::SCurve]
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
