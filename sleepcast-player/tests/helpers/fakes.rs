//! Scripted collaborators for session tests

use sleepcast_player::audio::{AudioFetcher, FetchedAudio};
use sleepcast_player::catalog::FeedEpisode;
use sleepcast_player::feeds::{FeedDirectory, ParsedFeed, TopFeed, TopFeeds};
use sleepcast_player::{Error, Result};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::audio_generator::sine_wav_bytes;
use super::TEST_RATE;

/// Serves a WAV clip for every URL except the ones marked failing
pub struct FakeFetcher {
    clip: Vec<u8>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeFetcher {
    /// Thirty seconds of quiet sine at the test rate
    pub fn new() -> Self {
        Self {
            clip: sine_wav_bytes(TEST_RATE, 1, 30_000, 220.0, 0.2),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    /// Hold every fetch for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Fetches issued for `url`
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl AudioFetcher for FakeFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchedAudio>> {
        Box::pin(async move {
            self.total.fetch_add(1, Ordering::SeqCst);
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing.lock().unwrap().contains(url) {
                return Err(Error::Fetch {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(FetchedAudio {
                bytes: self.clip.clone(),
                content_type: "audio/wav".to_string(),
                note: None,
            })
        })
    }
}

/// Feeds and top list held in memory
#[derive(Default)]
pub struct FakeFeedDirectory {
    feeds: Mutex<HashMap<String, ParsedFeed>>,
    top: Mutex<Option<TopFeeds>>,
}

impl FakeFeedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed whose episodes live at the given audio URLs
    pub fn add(&self, feed_url: &str, title: &str, audio_urls: &[&str]) {
        let episodes = audio_urls
            .iter()
            .enumerate()
            .map(|(i, url)| FeedEpisode {
                title: format!("{} #{}", title, i + 1),
                audio_url: url.to_string(),
            })
            .collect();
        self.feeds.lock().unwrap().insert(
            feed_url.to_string(),
            ParsedFeed {
                title: title.to_string(),
                episodes,
            },
        );
    }

    pub fn set_top(&self, feeds: &[(&str, &str)], warning: Option<&str>) {
        *self.top.lock().unwrap() = Some(TopFeeds {
            feeds: feeds
                .iter()
                .map(|(title, url)| TopFeed {
                    title: title.to_string(),
                    feed_url: url.to_string(),
                })
                .collect(),
            warning: warning.map(str::to_string),
        });
    }
}

impl FeedDirectory for FakeFeedDirectory {
    fn fetch_episodes<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<ParsedFeed>> {
        Box::pin(async move {
            self.feeds
                .lock()
                .unwrap()
                .get(feed_url)
                .cloned()
                .ok_or_else(|| Error::Feed(format!("Feed unreachable: {}", feed_url)))
        })
    }

    fn top_feeds<'a>(
        &'a self,
        _country: Option<&'a str>,
        _genre: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TopFeeds>> {
        Box::pin(async move { Ok(self.top.lock().unwrap().clone().unwrap_or_else(TopFeeds::fallback)) })
    }
}
