//! Memoizing fetch + decode cache
//!
//! Decoded buffers are keyed by source URL and kept for the lifetime of the
//! session. Failures are returned to the caller and never retried here.

use crate::audio::decoder::AudioDecoder;
use crate::audio::fetch::AudioFetcher;
use crate::audio::resampler::Resampler;
use crate::audio::types::DecodedAudio;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Decoded audio cache
pub struct DecodedAudioCache {
    fetcher: Arc<dyn AudioFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    /// Working rate every cached buffer is converted to
    sample_rate: u32,
    entries: RwLock<HashMap<String, Arc<DecodedAudio>>>,
}

impl DecodedAudioCache {
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        sample_rate: u32,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            sample_rate,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the decoded buffer for `url`, fetching and decoding on first use
    ///
    /// # Errors
    /// - `Fetch` / `Network` when the bytes cannot be retrieved
    /// - `Decode` when the payload is not decodable
    pub async fn get(&self, url: &str) -> Result<Arc<DecodedAudio>> {
        if let Some(audio) = self.entries.read().await.get(url) {
            return Ok(Arc::clone(audio));
        }

        let fetched = self.fetcher.fetch(url).await?;
        if let Some(note) = &fetched.note {
            debug!(url = %url, "{}", note);
        }

        let audio = self.decode(fetched.bytes, fetched.content_type).await?;
        self.entries
            .write()
            .await
            .insert(url.to_string(), Arc::clone(&audio));
        Ok(audio)
    }

    /// Decode a local file, cached under its path
    pub async fn get_file(&self, path: &Path) -> Result<Arc<DecodedAudio>> {
        let key = format!("file://{}", path.display());
        if let Some(audio) = self.entries.read().await.get(&key) {
            return Ok(Arc::clone(audio));
        }

        let bytes = tokio::fs::read(path).await?;
        let content_type = content_type_for_path(path);
        let audio = self.decode(bytes, content_type.to_string()).await?;
        self.entries.write().await.insert(key, Arc::clone(&audio));
        Ok(audio)
    }

    /// Decode and resample on the blocking pool
    async fn decode(&self, bytes: Vec<u8>, content_type: String) -> Result<Arc<DecodedAudio>> {
        let decoder = Arc::clone(&self.decoder);
        let sample_rate = self.sample_rate;

        let audio = tokio::task::spawn_blocking(move || {
            let decoded = decoder.decode(bytes, &content_type)?;
            Resampler::to_rate(decoded, sample_rate)
        })
        .await
        .map_err(|e| Error::Decode(format!("Decode task failed: {}", e)))??;

        if audio.is_empty() {
            return Err(Error::Decode("Decoded audio is empty".to_string()));
        }
        Ok(Arc::new(audio))
    }

    /// Whether `url` is already decoded
    pub async fn contains(&self, url: &str) -> bool {
        self.entries.read().await.contains_key(url)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// MIME type guessed from a file extension
fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fetch::FetchedAudio;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        status: Option<u16>,
    }

    impl AudioFetcher for CountingFetcher {
        fn fetch<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<FetchedAudio>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match self.status {
                Some(status) => Err(Error::Fetch {
                    status,
                    message: "gone".to_string(),
                }),
                None => Ok(FetchedAudio {
                    bytes: vec![1, 2, 3, 4],
                    content_type: "audio/mpeg".to_string(),
                    note: Some("Audio truncated to 4 bytes".to_string()),
                }),
            };
            Box::pin(async move { result })
        }
    }

    /// Treats every byte as one mono sample
    struct ByteDecoder;

    impl AudioDecoder for ByteDecoder {
        fn decode(&self, bytes: Vec<u8>, _content_type: &str) -> Result<DecodedAudio> {
            if bytes.is_empty() {
                return Err(Error::Decode("empty".to_string()));
            }
            let samples = bytes.iter().map(|&b| b as f32 / 255.0).collect();
            Ok(DecodedAudio::from_interleaved(samples, 8000, 1))
        }
    }

    fn cache(status: Option<u16>) -> (DecodedAudioCache, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            status,
        });
        let cache = DecodedAudioCache::new(fetcher.clone(), Arc::new(ByteDecoder), 8000);
        (cache, fetcher)
    }

    #[tokio::test]
    async fn test_second_get_is_memoized() {
        let (cache, fetcher) = cache(None);

        let first = cache.get("https://a.test/1.mp3").await.unwrap();
        let second = cache.get("https://a.test/1.mp3").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.frames(), 4);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("https://a.test/1.mp3").await);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let (cache, fetcher) = cache(Some(404));

        let result = cache.get("https://a.test/missing.mp3").await;
        assert!(matches!(result, Err(Error::Fetch { status: 404, .. })));

        let _ = cache.get("https://a.test/missing.mp3").await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("rain.WAV")), "audio/wav");
        assert_eq!(content_type_for_path(Path::new("waves.flac")), "audio/flac");
        assert_eq!(content_type_for_path(Path::new("noise")), "audio/mpeg");
    }
}
