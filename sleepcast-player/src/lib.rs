//! # Sleepcast Player Library
//!
//! Generative ambient sleep-sound engine.
//!
//! **Purpose:** Mix a looped noise bed with short, randomly timed excerpts of
//! podcast episodes, shaped by a shared low-pass and convolution reverb stage,
//! bounded by an optional sleep timer.
//!
//! **Architecture:** symphonia + rubato decode into a memoizing cache, a
//! pull-rendered mixing graph drives a cpal output stream, and a tokio task per
//! playback run schedules snippet attempts.

pub mod audio;
pub mod catalog;
pub mod error;
pub mod feed_store;
pub mod feeds;
pub mod graph;
pub mod noise;
pub mod scheduler;
pub mod session;
pub mod sleep_timer;
pub mod state;

pub use catalog::{Episode, EpisodeCatalog, Feed, Provenance};
pub use error::{Error, Result};
pub use session::{Session, SessionBuilder, SessionStatus};
