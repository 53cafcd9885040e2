//! # Sleepcast Common Library
//!
//! Shared code for the Sleepcast crates:
//! - Error type
//! - Session configuration record with defaults and clamped ranges
//! - Bootstrap TOML configuration loading
//! - Event types and event bus
//! - Fade curve definitions

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod settings;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use settings::{ConfigUpdate, SessionConfig};
