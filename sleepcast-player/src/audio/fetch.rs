//! Remote audio byte fetching
//!
//! The [`AudioFetcher`] seam returns raw bytes for an audio URL. The default
//! [`HttpAudioFetcher`] requests only the leading part of the file, which is
//! enough for short snippets and keeps memory bounded.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Maximum bytes read per audio source
pub const MAX_AUDIO_BYTES: usize = 2_500_000;

/// Request timeout for audio fetches
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// User agent sent to podcast hosts
pub const USER_AGENT: &str = concat!("sleepcast/", env!("CARGO_PKG_VERSION"));

const ACCEPT_AUDIO: &str = "audio/*;q=0.9,*/*;q=0.5";
const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// Raw audio payload
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Set when the payload was cut short
    pub note: Option<String>,
}

/// Fetch capability for audio bytes
pub trait AudioFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchedAudio>>;
}

/// HTTP fetcher using a ranged GET
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpAudioFetcher {
    pub fn new() -> Result<Self> {
        Self::with_limit(MAX_AUDIO_BYTES)
    }

    /// Create a fetcher with a custom byte cap
    pub fn with_limit(max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            max_bytes: max_bytes.max(1),
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<FetchedAudio> {
        debug!(url = %url, "Fetching audio");

        let mut response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_AUDIO)
            .header(RANGE, format!("bytes=0-{}", self.max_bytes - 1))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Fetch {
                status: status.as_u16(),
                message: detail.chars().take(140).collect(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut body = CappedBody::new(self.max_bytes);
        while let Some(chunk) = response.chunk().await? {
            if body.push(&chunk) {
                if !body.truncated {
                    body.settle(response.chunk().await);
                }
                break;
            }
        }
        Ok(body.into_audio(content_type))
    }
}

/// Response body accumulated up to a byte cap
struct CappedBody {
    bytes: Vec<u8>,
    max_bytes: usize,
    truncated: bool,
}

impl CappedBody {
    fn new(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_bytes,
            truncated: false,
        }
    }

    /// Append a chunk, returning true once the cap is reached
    fn push(&mut self, chunk: &[u8]) -> bool {
        let remaining = self.max_bytes - self.bytes.len();
        if chunk.len() >= remaining {
            self.bytes.extend_from_slice(&chunk[..remaining]);
            self.truncated = chunk.len() > remaining;
            return true;
        }
        self.bytes.extend_from_slice(chunk);
        false
    }

    /// Fold in the read that follows a body ending exactly at the cap
    ///
    /// A failed read there keeps the bytes already held.
    fn settle<T, E: std::fmt::Display>(&mut self, next: std::result::Result<Option<T>, E>) {
        match next {
            Ok(next) => self.truncated = next.is_some(),
            Err(e) => {
                debug!("Read past byte cap failed: {}", e);
                self.truncated = true;
            }
        }
    }

    fn into_audio(self, content_type: String) -> FetchedAudio {
        let note = self
            .truncated
            .then(|| format!("Audio truncated to {} bytes", self.bytes.len()));
        FetchedAudio {
            bytes: self.bytes,
            content_type,
            note,
        }
    }
}

impl AudioFetcher for HttpAudioFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchedAudio>> {
        Box::pin(self.fetch_bytes(url))
    }
}
