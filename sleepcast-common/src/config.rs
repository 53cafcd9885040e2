//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SLEEPCAST_CONFIG` environment variable
//! 3. `<config_dir>/sleepcast/config.toml`
//!
//! A missing or unreadable file is not fatal: a warning is logged and the
//! compiled defaults are used.

use crate::fade_curves::FadeCurve;
use crate::settings::SessionConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SLEEPCAST_CONFIG";

/// Default number of curated feeds kept in the catalog
pub const DEFAULT_CURATED_CAPACITY: usize = 50;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,

    /// Initial session configuration
    pub session: SessionConfig,

    pub noise: NoiseConfig,

    pub feeds: FeedsConfig,

    pub audio: AudioConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Noise bed configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Source used at startup: a preset name, an http(s) URL, or a file path
    pub default_source: Option<String>,

    /// Curve used for noise-bed crossfades
    pub crossfade_curve: FadeCurve,

    /// Extra named presets mapping to a URL or a file path
    pub presets: BTreeMap<String, String>,
}

/// Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Where user-subscribed feeds are persisted
    pub store_path: Option<PathBuf>,

    /// Maximum number of curated feeds kept
    pub curated_capacity: usize,

    /// Country code for the top list
    pub top_country: String,

    /// Optional genre id for the top list
    pub top_genre: Option<String>,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            curated_capacity: DEFAULT_CURATED_CAPACITY,
            top_country: "us".to_string(),
            top_genre: None,
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = default device)
    pub device: Option<String>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: TomlConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.session = config.session.sanitized();
        if config.feeds.curated_capacity == 0 {
            config.feeds.curated_capacity = DEFAULT_CURATED_CAPACITY;
        }
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve and load configuration, falling back to defaults
    pub fn load(cli_path: Option<&Path>) -> Self {
        let Some(path) = resolve_config_path(cli_path) else {
            debug!("No configuration file found, using defaults");
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => {
                debug!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "Failed to load configuration from {}: {} - using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Path of the user feed store (configured or platform default)
    pub fn feed_store_path(&self) -> PathBuf {
        self.feeds
            .store_path
            .clone()
            .unwrap_or_else(default_feed_store_path)
    }
}

/// Resolve the configuration file path
///
/// Returns `None` when neither an explicit path nor the default file exists.
/// An explicit path (argument or environment) is returned even if missing so
/// that the caller can report it.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let default = dirs::config_dir()?.join("sleepcast").join("config.toml");
    default.exists().then_some(default)
}

/// Platform default location of the user feed store
pub fn default_feed_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sleepcast"))
        .unwrap_or_else(|| PathBuf::from("./sleepcast_data"))
        .join("user_feeds.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.feeds.curated_capacity, DEFAULT_CURATED_CAPACITY);
        assert_eq!(config.feeds.top_country, "us");
        assert_eq!(config.noise.crossfade_curve, FadeCurve::Linear);
    }

    #[test]
    fn test_session_values_are_clamped() {
        let config = TomlConfig::from_toml_str(
            r#"
            [session]
            min_gap_secs = 0.2
            max_gap_secs = 90.0
            tone_hz = 10000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.session.min_gap_secs, 1.0);
        assert_eq!(config.session.max_gap_secs, 30.0);
        assert_eq!(config.session.tone_hz, 4000.0);
    }

    #[test]
    fn test_noise_presets() {
        let config = TomlConfig::from_toml_str(
            r#"
            [noise]
            default_source = "rain"
            crossfade_curve = "s_curve"

            [noise.presets]
            rain = "https://example.com/rain.mp3"
            "#,
        )
        .unwrap();
        assert_eq!(config.noise.default_source.as_deref(), Some("rain"));
        assert_eq!(config.noise.crossfade_curve, FadeCurve::SCurve);
        assert_eq!(
            config.noise.presets.get("rain").map(String::as_str),
            Some("https://example.com/rain.mp3")
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = TomlConfig::from_toml_str("[session\nnoise_level = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_store_path() {
        let config = TomlConfig::from_toml_str(
            r#"
            [feeds]
            store_path = "/tmp/feeds.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.feed_store_path(), PathBuf::from("/tmp/feeds.json"));
    }
}
