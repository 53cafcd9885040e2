//! Persistence of user-subscribed feeds
//!
//! Stored as a JSON array of `{ "feed_url", "title" }` records.

use crate::catalog::Feed;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFeed {
    pub feed_url: String,
    #[serde(default)]
    pub title: String,
}

/// JSON file of user feeds
#[derive(Debug, Clone)]
pub struct FeedStore {
    path: PathBuf,
}

impl FeedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored feeds; a missing file is an empty list
    pub fn load(&self) -> Result<Vec<StoredFeed>> {
        if !self.path.exists() {
            debug!("No feed store at {}", self.path.display());
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let feeds: Vec<StoredFeed> = serde_json::from_str(&text)?;
        debug!("Loaded {} stored feeds", feeds.len());
        Ok(feeds)
    }

    /// Replace the stored list with `feeds`, creating parent directories
    pub fn save<'a>(&self, feeds: impl IntoIterator<Item = &'a Feed>) -> Result<usize> {
        let records: Vec<StoredFeed> = feeds
            .into_iter()
            .map(|feed| StoredFeed {
                feed_url: feed.feed_url.clone(),
                title: feed.title.clone(),
            })
            .collect();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, text)?;
        info!("Saved {} feeds to {}", records.len(), self.path.display());
        Ok(records.len())
    }
}
