//! Test helper modules for sleepcast-player integration tests
//!
//! - audio_generator: in-memory WAV fixtures
//! - fakes: scripted fetcher and feed directory

#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

pub use fakes::{FakeFeedDirectory, FakeFetcher};

use sleepcast_common::SessionConfig;
use sleepcast_player::Session;
use std::sync::Arc;

/// Graph and fixture rate used by session tests
pub const TEST_RATE: u32 = 8000;

/// Session wired to the given fakes with a fixed seed
pub fn test_session(
    fetcher: Arc<FakeFetcher>,
    feeds: Arc<FakeFeedDirectory>,
    config: SessionConfig,
) -> Session {
    Session::builder()
        .config(config)
        .sample_rate(TEST_RATE)
        .fetcher(fetcher)
        .feed_directory(feeds)
        .seed(42)
        .build()
        .unwrap()
}
