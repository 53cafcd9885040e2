//! Podcast feed directory
//!
//! The [`FeedDirectory`] seam lists a feed's playable episodes and the current
//! top podcasts. [`HttpFeedDirectory`] reads RSS with a tolerant regex scan and
//! resolves the top list through the Apple charts and lookup endpoints.

use crate::audio::fetch::USER_AGENT;
use crate::catalog::FeedEpisode;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for feed and top-list requests
pub const FEED_TIMEOUT: Duration = Duration::from_secs(15);
pub const TOP_LIST_TIMEOUT: Duration = Duration::from_secs(6);

/// Entries taken from the top list
pub const TOP_LIST_LIMIT: usize = 50;

/// Concurrent feed-url lookups while resolving the top list
const LOOKUP_CONCURRENCY: usize = 8;

pub const FALLBACK_WARNING: &str = "Using fallback list because the Apple API was unreachable.";

const FALLBACK_FEEDS: [(&str, &str); 5] = [
    ("The Daily", "https://feeds.simplecast.com/54nAGcIl"),
    ("Stuff You Should Know", "https://feeds.megaphone.fm/stuffyoushouldknow"),
    ("Radiolab", "https://feeds.wnyc.org/radiolab"),
    ("99% Invisible", "https://feeds.simplecast.com/BqbsxVfO"),
    ("This American Life", "https://feeds.thisamericanlife.org/talpodcast"),
];

/// Episodes listed by one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub episodes: Vec<FeedEpisode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopFeed {
    pub title: String,
    pub feed_url: String,
}

/// Ordered top list, with a warning when a fallback was substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopFeeds {
    pub feeds: Vec<TopFeed>,
    pub warning: Option<String>,
}

impl TopFeeds {
    /// Built-in list used when the charts cannot be reached
    pub fn fallback() -> Self {
        Self {
            feeds: FALLBACK_FEEDS
                .iter()
                .map(|(title, url)| TopFeed {
                    title: title.to_string(),
                    feed_url: url.to_string(),
                })
                .collect(),
            warning: Some(FALLBACK_WARNING.to_string()),
        }
    }
}

/// Feed lookup capability
pub trait FeedDirectory: Send + Sync {
    /// List a feed's playable episodes
    ///
    /// # Errors
    /// `Feed` when the feed is unreachable, unparseable or has no playable
    /// episodes.
    fn fetch_episodes<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<ParsedFeed>>;

    /// Current top podcasts for an optional country and genre
    fn top_feeds<'a>(
        &'a self,
        country: Option<&'a str>,
        genre: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TopFeeds>>;
}

/// Regex-based RSS scanner
pub struct RssParser {
    channel: Regex,
    item: Regex,
    item_start: Regex,
    title: Regex,
    enclosure: Regex,
    attribute: Regex,
    link: Regex,
    audio_link: Regex,
}

impl RssParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::Common(sleepcast_common::Error::Internal(format!(
                    "Invalid feed pattern: {}",
                    e
                )))
            })
        };
        Ok(Self {
            channel: compile(r"(?i)<channel[\s\S]*?</channel>")?,
            item: compile(r"(?i)<item[\s>][\s\S]*?</item>")?,
            item_start: compile(r"(?i)<item[\s>]")?,
            title: compile(r"(?i)<title[^>]*>([\s\S]*?)</title>")?,
            enclosure: compile(r"(?i)<enclosure\b[^>]*>")?,
            attribute: compile(r#"(?i)\b(url|type)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            link: compile(r"(?i)<link[^>]*>([\s\S]*?)</link>")?,
            audio_link: compile(r"(?i)(\.mp3|\.m4a|\.aac|\.wav|\.ogg)(\?|$)")?,
        })
    }

    /// Extract the channel title and every item with a playable audio URL
    ///
    /// Items without audio are skipped; missing titles fall back to
    /// "Podcast feed" and "Episode".
    pub fn parse(&self, xml: &str) -> ParsedFeed {
        let channel = self.channel.find(xml).map_or(xml, |m| m.as_str());
        let head = self
            .item_start
            .find(channel)
            .map_or(channel, |m| &channel[..m.start()]);
        let title = self
            .title_of(head)
            .unwrap_or_else(|| "Podcast feed".to_string());

        let episodes = self
            .item
            .find_iter(channel)
            .filter_map(|item| {
                let item = item.as_str();
                let audio_url = self.audio_url(item)?;
                Some(FeedEpisode {
                    title: self.title_of(item).unwrap_or_else(|| "Episode".to_string()),
                    audio_url,
                })
            })
            .collect();

        ParsedFeed { title, episodes }
    }

    fn title_of(&self, text: &str) -> Option<String> {
        let raw = self.title.captures(text)?.get(1)?.as_str();
        let title = decode_entities(strip_cdata(raw).trim());
        (!title.is_empty()).then_some(title)
    }

    fn audio_url(&self, item: &str) -> Option<String> {
        if let Some(tag) = self.enclosure.find(item) {
            let mut url = None;
            let mut kind = None;
            for caps in self.attribute.captures_iter(tag.as_str()) {
                let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                    Some("url") => url = value,
                    Some("type") => kind = value,
                    _ => {}
                }
            }
            let audio = kind.map_or(true, |k| k.to_ascii_lowercase().contains("audio"));
            if let (Some(url), true) = (url, audio) {
                let url = decode_entities(url.trim());
                if !url.is_empty() {
                    return Some(url);
                }
            }
        }

        let link = self.link.captures(item)?.get(1)?.as_str();
        let link = decode_entities(strip_cdata(link).trim());
        self.audio_link.is_match(&link).then_some(link)
    }
}

fn strip_cdata(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn is_http_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    feed: ChartFeed,
}

#[derive(Debug, Deserialize)]
struct ChartFeed {
    #[serde(default)]
    results: Vec<ChartEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartEntry {
    id: Option<String>,
    name: Option<String>,
    artist_name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResult {
    feed_url: Option<String>,
}

/// HTTP feed directory
pub struct HttpFeedDirectory {
    client: reqwest::Client,
    parser: RssParser,
    podcast_id: Regex,
}

impl HttpFeedDirectory {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        let podcast_id = Regex::new(r"/id(\d+)").map_err(|e| {
            Error::Common(sleepcast_common::Error::Internal(format!(
                "Invalid feed pattern: {}",
                e
            )))
        })?;

        Ok(Self {
            client,
            parser: RssParser::new()?,
            podcast_id,
        })
    }

    async fn fetch_feed(&self, feed_url: &str) -> Result<ParsedFeed> {
        if !is_http_url(feed_url) {
            return Err(Error::Feed(format!("Not an http(s) feed URL: {}", feed_url)));
        }
        debug!(url = %feed_url, "Fetching feed");

        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| Error::Feed(format!("Feed unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!("Feed request failed with {}", status)));
        }

        let xml = response
            .text()
            .await
            .map_err(|e| Error::Feed(format!("Feed body unreadable: {}", e)))?;

        let parsed = self.parser.parse(&xml);
        if parsed.episodes.is_empty() {
            return Err(Error::Feed("No playable episodes found".to_string()));
        }
        info!(
            "Feed \"{}\" lists {} playable episodes",
            parsed.title,
            parsed.episodes.len()
        );
        Ok(parsed)
    }

    async fn fetch_top(&self, country: Option<&str>, genre: Option<&str>) -> Result<TopFeeds> {
        match self.resolve_top(country, genre).await {
            Ok(feeds) if !feeds.is_empty() => Ok(TopFeeds {
                feeds,
                warning: None,
            }),
            Ok(_) => {
                warn!("Top list resolved no feeds, using fallback list");
                Ok(TopFeeds::fallback())
            }
            Err(e) => {
                warn!("Top list unavailable: {} - using fallback list", e);
                Ok(TopFeeds::fallback())
            }
        }
    }

    async fn resolve_top(&self, country: Option<&str>, genre: Option<&str>) -> Result<Vec<TopFeed>> {
        let country = country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("us")
            .to_ascii_lowercase();
        let genre = genre.map(str::trim).filter(|g| !g.is_empty()).unwrap_or("all");
        let url = format!(
            "https://rss.itunes.apple.com/api/v1/{}/podcasts/top-podcasts/{}/100/explicit.json",
            country, genre
        );

        let response = self
            .client
            .get(&url)
            .timeout(TOP_LIST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "Top list request failed with {}",
                response.status()
            )));
        }
        let chart: ChartResponse = response.json().await?;

        let entries: Vec<(String, String)> = chart
            .feed
            .results
            .into_iter()
            .take(TOP_LIST_LIMIT)
            .filter_map(|entry| {
                let id = entry.id.clone().or_else(|| {
                    let url = entry.url.as_deref()?;
                    Some(self.podcast_id.captures(url)?.get(1)?.as_str().to_string())
                })?;
                let title = entry
                    .name
                    .or(entry.artist_name)
                    .unwrap_or_else(|| "Podcast".to_string());
                Some((id, title))
            })
            .collect();

        let feeds = stream::iter(entries)
            .map(|(id, title)| async move {
                match self.lookup_feed_url(&id).await {
                    Ok(Some(feed_url)) => Some(TopFeed { title, feed_url }),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("Lookup for podcast {} failed: {}", id, e);
                        None
                    }
                }
            })
            .buffered(LOOKUP_CONCURRENCY)
            .filter_map(|feed| async move { feed })
            .collect::<Vec<_>>()
            .await;

        Ok(feeds)
    }

    async fn lookup_feed_url(&self, id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get("https://itunes.apple.com/lookup")
            .query(&[("id", id)])
            .timeout(TOP_LIST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let lookup: LookupResponse = response.json().await?;
        Ok(lookup
            .results
            .into_iter()
            .find_map(|r| r.feed_url)
            .filter(|url| is_http_url(url)))
    }
}

impl FeedDirectory for HttpFeedDirectory {
    fn fetch_episodes<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<ParsedFeed>> {
        Box::pin(self.fetch_feed(feed_url))
    }

    fn top_feeds<'a>(
        &'a self,
        country: Option<&'a str>,
        genre: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TopFeeds>> {
        Box::pin(self.fetch_top(country, genre))
    }
}
