//! Session configuration record
//!
//! Every tunable of a playback session lives here with a named default and a
//! clamped range. Invalid numeric input never raises an error: non-finite
//! values fall back to the default, finite values are clamped into range.
//!
//! Ranges:
//! - `noise_level`, `snippet_level`, `reverb_mix`: 0.0 to 1.0
//! - `min_gap_secs`, `max_gap_secs`: 1 to 30 seconds
//! - `min_length_secs`, `max_length_secs`: 4 to 60 seconds
//! - `tone_hz`: 400 to 4000 Hz
//! - `sleep_minutes`: 0 disables the sleep timer
//!
//! When a maximum ends up below its minimum, the maximum is raised to the
//! minimum (never the reverse).

use serde::{Deserialize, Serialize};

pub const DEFAULT_NOISE_LEVEL: f32 = 0.35;
pub const DEFAULT_SNIPPET_LEVEL: f32 = 0.7;
pub const DEFAULT_MIN_GAP_SECS: f64 = 6.0;
pub const DEFAULT_MAX_GAP_SECS: f64 = 18.0;
pub const DEFAULT_MIN_LENGTH_SECS: f64 = 18.0;
pub const DEFAULT_MAX_LENGTH_SECS: f64 = 26.0;
pub const DEFAULT_TONE_HZ: f32 = 2200.0;
pub const DEFAULT_REVERB_MIX: f32 = 0.55;

pub const GAP_RANGE_SECS: (f64, f64) = (1.0, 30.0);
pub const LENGTH_RANGE_SECS: (f64, f64) = (4.0, 60.0);
pub const TONE_RANGE_HZ: (f32, f32) = (400.0, 4000.0);

/// Explicit session configuration
///
/// Always holds clamped values once produced by [`SessionConfig::apply`] or
/// [`SessionConfig::sanitized`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Noise bus gain
    pub noise_level: f32,
    /// Shared snippet gain
    pub snippet_level: f32,
    /// Lower bound of the gap after a successful snippet
    pub min_gap_secs: f64,
    /// Upper bound of the gap after a successful snippet
    pub max_gap_secs: f64,
    /// Lower bound of snippet duration
    pub min_length_secs: f64,
    /// Upper bound of snippet duration
    pub max_length_secs: f64,
    /// Low-pass cutoff applied to snippets
    pub tone_hz: f32,
    /// Wet share of the snippet path (dry gets `1 - reverb_mix`)
    pub reverb_mix: f32,
    /// Sleep timer duration; not positive means off
    pub sleep_minutes: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            noise_level: DEFAULT_NOISE_LEVEL,
            snippet_level: DEFAULT_SNIPPET_LEVEL,
            min_gap_secs: DEFAULT_MIN_GAP_SECS,
            max_gap_secs: DEFAULT_MAX_GAP_SECS,
            min_length_secs: DEFAULT_MIN_LENGTH_SECS,
            max_length_secs: DEFAULT_MAX_LENGTH_SECS,
            tone_hz: DEFAULT_TONE_HZ,
            reverb_mix: DEFAULT_REVERB_MIX,
            sleep_minutes: 0.0,
        }
    }
}

/// Partial configuration change
///
/// Each field is applied independently; `None` leaves the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub noise_level: Option<f32>,
    pub snippet_level: Option<f32>,
    pub min_gap_secs: Option<f64>,
    pub max_gap_secs: Option<f64>,
    pub min_length_secs: Option<f64>,
    pub max_length_secs: Option<f64>,
    pub tone_hz: Option<f32>,
    pub reverb_mix: Option<f32>,
    pub sleep_minutes: Option<f64>,
}

impl SessionConfig {
    /// Return a copy with every field clamped into its range
    pub fn sanitized(&self) -> Self {
        let mut config = Self {
            noise_level: clamp_f32(self.noise_level, 0.0, 1.0, DEFAULT_NOISE_LEVEL),
            snippet_level: clamp_f32(self.snippet_level, 0.0, 1.0, DEFAULT_SNIPPET_LEVEL),
            min_gap_secs: clamp_f64(self.min_gap_secs, GAP_RANGE_SECS, DEFAULT_MIN_GAP_SECS),
            max_gap_secs: clamp_f64(self.max_gap_secs, GAP_RANGE_SECS, DEFAULT_MAX_GAP_SECS),
            min_length_secs: clamp_f64(
                self.min_length_secs,
                LENGTH_RANGE_SECS,
                DEFAULT_MIN_LENGTH_SECS,
            ),
            max_length_secs: clamp_f64(
                self.max_length_secs,
                LENGTH_RANGE_SECS,
                DEFAULT_MAX_LENGTH_SECS,
            ),
            tone_hz: clamp_f32(self.tone_hz, TONE_RANGE_HZ.0, TONE_RANGE_HZ.1, DEFAULT_TONE_HZ),
            reverb_mix: clamp_f32(self.reverb_mix, 0.0, 1.0, DEFAULT_REVERB_MIX),
            sleep_minutes: if self.sleep_minutes.is_finite() && self.sleep_minutes > 0.0 {
                self.sleep_minutes
            } else {
                0.0
            },
        };

        if config.max_gap_secs < config.min_gap_secs {
            config.max_gap_secs = config.min_gap_secs;
        }
        if config.max_length_secs < config.min_length_secs {
            config.max_length_secs = config.min_length_secs;
        }
        config
    }

    /// Apply a partial update and re-clamp
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(v) = update.noise_level {
            self.noise_level = v;
        }
        if let Some(v) = update.snippet_level {
            self.snippet_level = v;
        }
        if let Some(v) = update.min_gap_secs {
            self.min_gap_secs = v;
        }
        if let Some(v) = update.max_gap_secs {
            self.max_gap_secs = v;
        }
        if let Some(v) = update.min_length_secs {
            self.min_length_secs = v;
        }
        if let Some(v) = update.max_length_secs {
            self.max_length_secs = v;
        }
        if let Some(v) = update.tone_hz {
            self.tone_hz = v;
        }
        if let Some(v) = update.reverb_mix {
            self.reverb_mix = v;
        }
        if let Some(v) = update.sleep_minutes {
            self.sleep_minutes = v;
        }
        *self = self.sanitized();
    }

    /// Dry path gain (`1 - reverb_mix`)
    pub fn dry_gain(&self) -> f32 {
        1.0 - self.reverb_mix
    }

    /// Sleep timer duration, if enabled
    pub fn sleep_duration(&self) -> Option<std::time::Duration> {
        if self.sleep_minutes.is_finite() && self.sleep_minutes > 0.0 {
            Some(std::time::Duration::from_secs_f64(self.sleep_minutes * 60.0))
        } else {
            None
        }
    }
}

fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn clamp_f64(value: f64, (min, max): (f64, f64), fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
