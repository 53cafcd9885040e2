//! Episode catalog with weighted selection and failure demerits
//!
//! Holds known feeds and their episodes. Episodes from user-subscribed feeds
//! are drawn twice as often as curated ones. Each failed snippet attempt adds a
//! demerit to the episode; the third consecutive demerit removes it.
//!
//! Selection returns a cloned [`Episode`] and outcomes are applied by audio URL,
//! so feeds may be added or removed while an attempt is in flight.

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Consecutive failures that remove an episode
pub const FAILURE_LIMIT: u32 = 3;

/// Where a feed came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Loaded from the top list
    Curated,
    /// Subscribed by the listener
    User,
}

impl Provenance {
    /// Selection weight per episode
    pub fn weight(self) -> u32 {
        match self {
            Provenance::User => 2,
            Provenance::Curated => 1,
        }
    }
}

/// A known feed, keyed by URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub feed_url: String,
    pub title: String,
    pub provenance: Provenance,
}

/// Episode as parsed from a feed, before it joins the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEpisode {
    pub title: String,
    pub audio_url: String,
}

/// A playable episode, keyed by audio URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub audio_url: String,
    pub title: String,
    /// URL of the owning feed
    pub feed_url: String,
    /// Inherited from the owning feed
    pub provenance: Provenance,
    /// Consecutive failed attempts
    pub failure_count: u32,
}

/// Result of recording an attempt outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeEffect {
    /// Counter updated; the episode stays eligible
    Recorded { failure_count: u32 },
    /// Failure limit reached; the episode was removed
    Evicted(Episode),
    /// The episode is no longer in the catalog
    Unknown,
}

/// Episode counts by provenance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub feeds: usize,
    pub total_episodes: usize,
    pub user_episodes: usize,
    pub curated_episodes: usize,
}

/// Feeds and episodes known to a session
#[derive(Debug, Clone)]
pub struct EpisodeCatalog {
    /// Insertion order; oldest curated feeds are evicted first
    feeds: Vec<Feed>,
    episodes: Vec<Episode>,
    curated_capacity: usize,
}

impl Default for EpisodeCatalog {
    fn default() -> Self {
        Self::new(sleepcast_common::config::DEFAULT_CURATED_CAPACITY)
    }
}

impl EpisodeCatalog {
    /// Create an empty catalog holding at most `curated_capacity` curated feeds
    pub fn new(curated_capacity: usize) -> Self {
        Self {
            feeds: Vec::new(),
            episodes: Vec::new(),
            curated_capacity: curated_capacity.max(1),
        }
    }

    /// Register a feed
    ///
    /// Re-adding a known URL updates its title. A user subscription upgrades a
    /// curated feed (and its episodes) to user provenance; a curated add never
    /// downgrades a user feed.
    ///
    /// # Returns
    /// Curated feeds evicted to stay within capacity
    pub fn add_feed(&mut self, feed_url: &str, title: &str, provenance: Provenance) -> Vec<Feed> {
        if let Some(existing) = self.feeds.iter_mut().find(|f| f.feed_url == feed_url) {
            if !title.is_empty() {
                existing.title = title.to_string();
            }
            if provenance == Provenance::User && existing.provenance == Provenance::Curated {
                debug!("Upgrading curated feed to user subscription: {}", feed_url);
                existing.provenance = Provenance::User;
                for episode in self.episodes.iter_mut().filter(|e| e.feed_url == feed_url) {
                    episode.provenance = Provenance::User;
                }
            }
            return Vec::new();
        }

        self.feeds.push(Feed {
            feed_url: feed_url.to_string(),
            title: title.to_string(),
            provenance,
        });

        if provenance == Provenance::Curated {
            self.evict_excess_curated()
        } else {
            Vec::new()
        }
    }

    fn evict_excess_curated(&mut self) -> Vec<Feed> {
        let mut evicted = Vec::new();
        while self.curated_feed_count() > self.curated_capacity {
            let Some(index) = self
                .feeds
                .iter()
                .position(|f| f.provenance == Provenance::Curated)
            else {
                break;
            };
            let feed = self.feeds.remove(index);
            self.episodes.retain(|e| e.feed_url != feed.feed_url);
            info!("Evicted curated feed over capacity: {}", feed.title);
            evicted.push(feed);
        }
        evicted
    }

    fn curated_feed_count(&self) -> usize {
        self.feeds
            .iter()
            .filter(|f| f.provenance == Provenance::Curated)
            .count()
    }

    /// Merge parsed episodes into a registered feed, skipping known audio URLs
    ///
    /// # Returns
    /// Number of episodes added
    ///
    /// # Errors
    /// `InvalidState` if the feed is not registered
    pub fn add_episodes<I>(&mut self, feed_url: &str, episodes: I) -> Result<usize>
    where
        I: IntoIterator<Item = FeedEpisode>,
    {
        let provenance = self
            .feeds
            .iter()
            .find(|f| f.feed_url == feed_url)
            .map(|f| f.provenance)
            .ok_or_else(|| Error::InvalidState(format!("Feed not registered: {}", feed_url)))?;

        let mut added = 0;
        for episode in episodes {
            if self.episodes.iter().any(|e| e.audio_url == episode.audio_url) {
                continue;
            }
            self.episodes.push(Episode {
                audio_url: episode.audio_url,
                title: episode.title,
                feed_url: feed_url.to_string(),
                provenance,
                failure_count: 0,
            });
            added += 1;
        }

        debug!("Added {} episodes from {}", added, feed_url);
        Ok(added)
    }

    /// Remove a user feed and its episodes
    ///
    /// # Returns
    /// The removed feed and the number of episodes removed with it
    ///
    /// # Errors
    /// - `NotFound` if the feed is unknown
    /// - `InvalidState` for curated feeds (they leave only by capacity eviction)
    pub fn remove_feed(&mut self, feed_url: &str) -> Result<(Feed, usize)> {
        let index = self
            .feeds
            .iter()
            .position(|f| f.feed_url == feed_url)
            .ok_or_else(|| {
                sleepcast_common::Error::NotFound(format!("Feed not found: {}", feed_url))
            })?;

        if self.feeds[index].provenance == Provenance::Curated {
            return Err(Error::InvalidState(format!(
                "Curated feed cannot be removed: {}",
                feed_url
            )));
        }

        let feed = self.feeds.remove(index);
        let before = self.episodes.len();
        self.episodes.retain(|e| e.feed_url != feed_url);
        Ok((feed, before - self.episodes.len()))
    }

    /// Draw an episode with replacement, user episodes weighted 2 and curated 1
    ///
    /// Returns `None` when the catalog is empty.
    pub fn select_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Episode> {
        self.episodes
            .choose_weighted(rng, |e| e.provenance.weight())
            .ok()
            .cloned()
    }

    /// Apply an attempt outcome by audio URL
    ///
    /// Success resets the counter; failure increments it and removes the
    /// episode at [`FAILURE_LIMIT`]. Outcomes for unknown URLs are ignored.
    pub fn record_outcome(&mut self, audio_url: &str, success: bool) -> OutcomeEffect {
        let Some(index) = self.episodes.iter().position(|e| e.audio_url == audio_url) else {
            return OutcomeEffect::Unknown;
        };

        let episode = &mut self.episodes[index];
        if success {
            episode.failure_count = 0;
            return OutcomeEffect::Recorded { failure_count: 0 };
        }

        episode.failure_count += 1;
        if episode.failure_count >= FAILURE_LIMIT {
            let removed = self.episodes.remove(index);
            info!(
                "Removed episode after {} failures: {}",
                removed.failure_count, removed.title
            );
            OutcomeEffect::Evicted(removed)
        } else {
            OutcomeEffect::Recorded {
                failure_count: episode.failure_count,
            }
        }
    }

    /// Clear every failure counter
    pub fn reset_failures(&mut self) {
        for episode in &mut self.episodes {
            episode.failure_count = 0;
        }
    }

    pub fn summary(&self) -> CatalogSummary {
        let user_episodes = self
            .episodes
            .iter()
            .filter(|e| e.provenance == Provenance::User)
            .count();
        CatalogSummary {
            feeds: self.feeds.len(),
            total_episodes: self.episodes.len(),
            user_episodes,
            curated_episodes: self.episodes.len() - user_episodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Look up an episode by audio URL
    pub fn episode(&self, audio_url: &str) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.audio_url == audio_url)
    }

    /// Feeds subscribed by the listener
    pub fn user_feeds(&self) -> impl Iterator<Item = &Feed> {
        self.feeds
            .iter()
            .filter(|f| f.provenance == Provenance::User)
    }
}
