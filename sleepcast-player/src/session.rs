//! Playback session
//!
//! A [`Session`] owns every component of one listening session: catalog,
//! decode cache, mixing graph, noise bed, snippet scheduler and sleep timer.
//! Sessions are independent; nothing is process-global.
//!
//! Lock order: control, then graph, then the noise selection. The control
//! mutex serializes start, stop and configuration changes.

use crate::audio::cache::DecodedAudioCache;
use crate::audio::decoder::{AudioDecoder, SymphoniaDecoder};
use crate::audio::fetch::{AudioFetcher, HttpAudioFetcher};
use crate::audio::resampler::DEFAULT_SAMPLE_RATE;
use crate::catalog::{CatalogSummary, EpisodeCatalog, Feed, Provenance};
use crate::error::{Error, Result};
use crate::feeds::{FeedDirectory, HttpFeedDirectory, ParsedFeed};
use crate::graph::reverb::ImpulseResponse;
use crate::graph::{lock_graph, MixingGraph, SharedGraph, MASTER_PLAYING_GAIN};
use crate::noise::{NoiseBed, NoiseLoop, NoiseSource};
use crate::scheduler::{SchedulerContext, SnippetScheduler};
use crate::sleep_timer::SleepTimer;
use crate::state::{Diagnostics, SharedState};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sleepcast_common::config::DEFAULT_CURATED_CAPACITY;
use sleepcast_common::events::{EventBus, SessionEvent, StopReason};
use sleepcast_common::{ConfigUpdate, FadeCurve, SessionConfig};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, RwLock};
use tracing::{debug, info, warn};

pub use crate::state::SessionStatus;

/// Master fade-in on start
pub const MASTER_FADE_IN: Duration = Duration::from_millis(1500);

/// Master fade-out on stop; idle is reported once it completes
pub const MASTER_FADE_OUT: Duration = Duration::from_secs(2);

/// Top-list feeds fetched concurrently
const TOP_FEED_CONCURRENCY: usize = 4;

/// Session builder
pub struct SessionBuilder {
    config: SessionConfig,
    sample_rate: u32,
    fetcher: Option<Arc<dyn AudioFetcher>>,
    decoder: Option<Arc<dyn AudioDecoder>>,
    feeds: Option<Arc<dyn FeedDirectory>>,
    seed: Option<u64>,
    noise_presets: BTreeMap<String, String>,
    crossfade_curve: FadeCurve,
    curated_capacity: usize,
    event_capacity: usize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            fetcher: None,
            decoder: None,
            feeds: None,
            seed: None,
            noise_presets: BTreeMap::new(),
            crossfade_curve: FadeCurve::default(),
            curated_capacity: DEFAULT_CURATED_CAPACITY,
            event_capacity: EventBus::default().capacity(),
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial configuration (clamped on build)
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Graph sample rate; should match the output device
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn AudioFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn feed_directory(mut self, feeds: Arc<dyn FeedDirectory>) -> Self {
        self.feeds = Some(feeds);
        self
    }

    /// Seed for every random draw (entropy when unset)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn noise_presets(mut self, presets: BTreeMap<String, String>) -> Self {
        self.noise_presets = presets;
        self
    }

    pub fn crossfade_curve(mut self, curve: FadeCurve) -> Self {
        self.crossfade_curve = curve;
        self
    }

    pub fn curated_capacity(mut self, capacity: usize) -> Self {
        self.curated_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the session, creating HTTP collaborators for any not supplied
    pub fn build(self) -> Result<Session> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidState("Sample rate must be positive".to_string()));
        }

        let fetcher: Arc<dyn AudioFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpAudioFetcher::new()?),
        };
        let decoder: Arc<dyn AudioDecoder> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(SymphoniaDecoder),
        };
        let feeds: Arc<dyn FeedDirectory> = match self.feeds {
            Some(feeds) => feeds,
            None => Arc::new(HttpFeedDirectory::new()?),
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let state = Arc::new(SharedState::new(self.event_capacity.max(1)));
        let ctx = SchedulerContext {
            catalog: Arc::new(RwLock::new(EpisodeCatalog::new(self.curated_capacity))),
            cache: Arc::new(DecodedAudioCache::new(fetcher, decoder, self.sample_rate)),
            graph: Arc::new(Mutex::new(None)),
            config: Arc::new(StdRwLock::new(self.config.sanitized())),
            rng: Arc::new(Mutex::new(rng)),
            state: Arc::clone(&state),
        };

        debug!("Session built at {}Hz", self.sample_rate);
        Ok(Session {
            inner: Arc::new(SessionInner {
                noise: NoiseBed::new(self.noise_presets, self.crossfade_curve, self.sample_rate),
                control: AsyncMutex::new(Control {
                    scheduler: SnippetScheduler::new(ctx.clone()),
                    timer: SleepTimer::new(Arc::clone(&state)),
                    generation: 0,
                    timer_epoch: 0,
                }),
                ctx,
                feeds,
                sample_rate: self.sample_rate,
            }),
        })
    }
}

struct Control {
    scheduler: SnippetScheduler,
    timer: SleepTimer,
    /// Bumped by every start and stop; a pending idle report only applies
    /// while it still matches
    generation: u64,
    /// Bumped by every arm and disarm; an expiry only stops playback while
    /// it still matches
    timer_epoch: u64,
}

impl Control {
    fn disarm_timer(&mut self) {
        self.timer_epoch += 1;
        self.timer.disarm();
    }
}

struct SessionInner {
    ctx: SchedulerContext,
    feeds: Arc<dyn FeedDirectory>,
    noise: NoiseBed,
    sample_rate: u32,
    control: AsyncMutex<Control>,
}

/// Result of loading the top list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopLoadReport {
    /// Feeds added to the catalog
    pub loaded: usize,
    /// Feeds that could not be fetched
    pub failed: usize,
    /// Episodes added
    pub episodes: usize,
    /// Set when a fallback list was used
    pub warning: Option<String>,
}

/// Handle to a playback session (cheap to clone)
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Start playback
    ///
    /// Builds the mixing graph on first use, fades the master in, starts the
    /// noise bed, fires an immediate snippet attempt and arms the sleep timer
    /// when configured. Starting while playing is a no-op.
    ///
    /// # Errors
    /// `NoEpisodes` when the catalog is empty.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if inner.ctx.state.status().await.is_playing() {
            debug!("Start ignored: already playing");
            return Ok(());
        }

        {
            let mut catalog = inner.ctx.catalog.write().await;
            if catalog.is_empty() {
                warn!("Cannot start: no episodes loaded");
                return Err(Error::NoEpisodes);
            }
            catalog.reset_failures();
        }
        inner.ctx.state.reset_diagnostics("Starting playback...").await;

        let config = self.config();
        self.ensure_graph(&config);
        {
            let mut slot = lock_graph(&inner.ctx.graph);
            if let Some(graph) = slot.as_mut() {
                graph.apply_config(&config);
                graph.ramp_master_from(0.0, MASTER_PLAYING_GAIN, MASTER_FADE_IN);
                inner.noise.start(graph, &inner.ctx.rng);
            }
        }

        control.generation += 1;
        inner.ctx.state.set_status(SessionStatus::Playing).await;
        info!("Playback started");

        if let Err(e) = control.scheduler.start().await {
            warn!("Snippet scheduler not started: {}", e);
        }
        if config.sleep_duration().is_some() {
            self.arm_timer(&mut control, config.sleep_minutes);
        } else {
            control.disarm_timer();
        }
        Ok(())
    }

    /// Stop playback
    ///
    /// Fades the master to zero, stops the noise bed after the fade and
    /// cancels the scheduler and sleep timer at once. Status is `Stopping`
    /// until the fade completes, then `Idle`. Stopping while not playing is a
    /// no-op.
    pub async fn stop(&self, reason: StopReason) {
        let control = self.inner.control.lock().await;
        self.stop_locked(control, reason).await;
    }

    async fn stop_locked(&self, mut control: AsyncMutexGuard<'_, Control>, reason: StopReason) {
        let inner = &self.inner;
        if !inner.ctx.state.status().await.is_playing() {
            debug!("Stop ignored: not playing");
            return;
        }

        control.scheduler.stop();
        control.disarm_timer();
        {
            let mut slot = lock_graph(&inner.ctx.graph);
            if let Some(graph) = slot.as_mut() {
                graph.ramp_master(0.0, MASTER_FADE_OUT);
                inner.noise.stop(graph, MASTER_FADE_OUT);
            }
        }

        control.generation += 1;
        let generation = control.generation;
        inner
            .ctx
            .state
            .set_status(SessionStatus::Stopping { reason })
            .await;
        info!(reason = %reason, "Playback stopping");
        drop(control);

        let session = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(MASTER_FADE_OUT).await;
            if let Some(inner) = session.upgrade() {
                Session { inner }.finish_stop(generation, reason).await;
            }
        });
    }

    async fn finish_stop(&self, generation: u64, reason: StopReason) {
        let control = self.inner.control.lock().await;
        if control.generation != generation {
            debug!("Idle report superseded");
            return;
        }
        self.inner
            .ctx
            .state
            .set_status(SessionStatus::Idle {
                last_stop: Some(reason),
            })
            .await;
        info!(reason = %reason, "Playback idle");
    }

    /// Apply a partial configuration change
    ///
    /// Gains, tone and reverb mix take effect immediately; gap and length
    /// bounds apply from the next draw. Changing the sleep duration while
    /// playing re-arms (or disarms) the timer.
    pub async fn configure(&self, update: ConfigUpdate) -> SessionConfig {
        let mut control = self.inner.control.lock().await;
        let config = {
            let mut config = self
                .inner
                .ctx
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            config.apply(&update);
            *config
        };

        if let Some(graph) = lock_graph(&self.inner.ctx.graph).as_mut() {
            graph.apply_config(&config);
        }

        if update.sleep_minutes.is_some() && self.inner.ctx.state.status().await.is_playing() {
            if config.sleep_duration().is_some() {
                self.arm_timer(&mut control, config.sleep_minutes);
            } else {
                control.disarm_timer();
            }
        }
        debug!(?config, "Configuration updated");
        config
    }

    fn arm_timer(&self, control: &mut Control, minutes: f64) {
        control.timer_epoch += 1;
        let epoch = control.timer_epoch;
        let session: Weak<SessionInner> = Arc::downgrade(&self.inner);
        control.timer.arm(minutes, move || {
            if let Some(inner) = session.upgrade() {
                tokio::spawn(async move {
                    Session { inner }.timer_elapsed(epoch).await;
                });
            }
        });
    }

    /// Stop for the timer armed at `epoch`, unless it has since been re-armed,
    /// disarmed or superseded by a restart
    async fn timer_elapsed(&self, epoch: u64) {
        let control = self.inner.control.lock().await;
        if control.timer_epoch != epoch {
            debug!(epoch, current = control.timer_epoch, "Stale sleep timer expiry ignored");
            return;
        }
        self.stop_locked(control, StopReason::Timer).await;
    }

    /// Build the mixing graph once, outside the render lock
    fn ensure_graph(&self, config: &SessionConfig) {
        let ctx = &self.inner.ctx;
        if lock_graph(&ctx.graph).is_some() {
            return;
        }

        let impulse = {
            let mut rng = ctx.rng.lock().unwrap_or_else(PoisonError::into_inner);
            ImpulseResponse::room(&mut *rng, self.inner.sample_rate)
        };
        let graph = MixingGraph::new(self.inner.sample_rate, &impulse, config);

        let mut slot = lock_graph(&ctx.graph);
        if slot.is_none() {
            *slot = Some(graph);
        }
    }

    /// Resolve and activate a noise source
    ///
    /// Unresolvable sources fall back to generated white noise. While playing
    /// the new loop crossfades in; otherwise it is used at the next start.
    pub async fn select_noise(&self, source: NoiseSource) -> NoiseLoop {
        let inner = &self.inner;
        let noise = inner
            .noise
            .load(&source, &inner.ctx.cache, &inner.ctx.rng)
            .await;

        let _control = inner.control.lock().await;
        inner.noise.select(noise.clone());
        if inner.ctx.state.status().await.is_playing() {
            if let Some(graph) = lock_graph(&inner.ctx.graph).as_mut() {
                inner.noise.start(graph, &inner.ctx.rng);
            }
        }

        inner.ctx.state.broadcast_event(SessionEvent::NoiseBedChanged {
            label: noise.label.clone(),
            fallback: noise.fallback,
            timestamp: chrono::Utc::now(),
        });
        noise
    }

    /// Return to generated white noise
    pub async fn reset_noise(&self) {
        let inner = &self.inner;
        let _control = inner.control.lock().await;
        inner.noise.reset();
        if inner.ctx.state.status().await.is_playing() {
            if let Some(graph) = lock_graph(&inner.ctx.graph).as_mut() {
                inner.noise.start(graph, &inner.ctx.rng);
            }
        }

        inner.ctx.state.broadcast_event(SessionEvent::NoiseBedChanged {
            label: inner.noise.label(),
            fallback: false,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Subscribe to a feed
    ///
    /// # Returns
    /// Number of new episodes
    ///
    /// # Errors
    /// `Feed` when the feed cannot be read; the catalog is left unchanged.
    pub async fn subscribe(&self, feed_url: &str) -> Result<usize> {
        let feed_url = feed_url.trim();
        let parsed = self.inner.feeds.fetch_episodes(feed_url).await?;
        let added = self.add_feed(feed_url, parsed, Provenance::User).await?;
        info!("Subscribed to {} ({} new episodes)", feed_url, added);
        Ok(added)
    }

    /// Load the top list as curated feeds
    ///
    /// Feeds that fail to load are counted and skipped.
    pub async fn load_top(&self, country: Option<&str>, genre: Option<&str>) -> Result<TopLoadReport> {
        let top = self.inner.feeds.top_feeds(country, genre).await?;
        if let Some(warning) = &top.warning {
            warn!("{}", warning);
        }

        let feeds = Arc::clone(&self.inner.feeds);
        let results: Vec<_> = stream::iter(top.feeds)
            .map(|entry| {
                let feeds = Arc::clone(&feeds);
                async move {
                    let result = feeds.fetch_episodes(&entry.feed_url).await;
                    (entry, result)
                }
            })
            .buffered(TOP_FEED_CONCURRENCY)
            .collect()
            .await;

        let mut report = TopLoadReport {
            warning: top.warning,
            ..TopLoadReport::default()
        };
        for (entry, result) in results {
            let added = match result {
                Ok(parsed) => self.add_feed(&entry.feed_url, parsed, Provenance::Curated).await,
                Err(e) => Err(e),
            };
            match added {
                Ok(episodes) => {
                    report.loaded += 1;
                    report.episodes += episodes;
                }
                Err(e) => {
                    debug!("Skipping top feed \"{}\": {}", entry.title, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Top list: {} feeds loaded, {} failed, {} episodes",
            report.loaded, report.failed, report.episodes
        );
        Ok(report)
    }

    /// Add an already parsed feed to the catalog
    pub async fn add_feed(&self, feed_url: &str, parsed: ParsedFeed, provenance: Provenance) -> Result<usize> {
        let (added, summary) = {
            let mut catalog = self.inner.ctx.catalog.write().await;
            for evicted in catalog.add_feed(feed_url, &parsed.title, provenance) {
                info!("Dropped curated feed \"{}\"", evicted.title);
            }
            let added = catalog.add_episodes(feed_url, parsed.episodes)?;
            (added, catalog.summary())
        };
        self.publish_catalog(summary);
        Ok(added)
    }

    /// Remove a user feed and its episodes
    ///
    /// # Returns
    /// Number of episodes removed
    pub async fn remove_feed(&self, feed_url: &str) -> Result<usize> {
        let (feed, removed, summary) = {
            let mut catalog = self.inner.ctx.catalog.write().await;
            let (feed, removed) = catalog.remove_feed(feed_url)?;
            (feed, removed, catalog.summary())
        };
        info!("Removed feed \"{}\" ({} episodes)", feed.title, removed);
        self.publish_catalog(summary);
        Ok(removed)
    }

    fn publish_catalog(&self, summary: CatalogSummary) {
        self.inner
            .ctx
            .state
            .broadcast_event(SessionEvent::CatalogChanged {
                total_episodes: summary.total_episodes,
                user_episodes: summary.user_episodes,
                curated_episodes: summary.curated_episodes,
                timestamp: chrono::Utc::now(),
            });
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.ctx.state.status().await
    }

    pub async fn is_playing(&self) -> bool {
        self.status().await.is_playing()
    }

    /// Snippet diagnostics including the next attempt time
    pub async fn diagnostics(&self) -> Diagnostics {
        let next = self.inner.control.lock().await.scheduler.next_wake();
        let mut diagnostics = self.inner.ctx.state.diagnostics().await;
        diagnostics.next_attempt_at = next;
        diagnostics
    }

    /// Active noise-bed label
    pub fn noise_label(&self) -> String {
        self.inner.noise.label()
    }

    pub fn noise_presets(&self) -> Vec<String> {
        self.inner.noise.preset_names()
    }

    pub fn config(&self) -> SessionConfig {
        *self
            .inner
            .ctx
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn catalog_summary(&self) -> CatalogSummary {
        self.inner.ctx.catalog.read().await.summary()
    }

    /// Read access to the catalog
    pub fn catalog(&self) -> Arc<RwLock<EpisodeCatalog>> {
        Arc::clone(&self.inner.ctx.catalog)
    }

    pub async fn user_feeds(&self) -> Vec<Feed> {
        self.inner
            .ctx
            .catalog
            .read()
            .await
            .user_feeds()
            .cloned()
            .collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.ctx.state.subscribe_events()
    }

    /// Graph handle for the output device
    pub fn graph(&self) -> SharedGraph {
        Arc::clone(&self.inner.ctx.graph)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Final value of the master gain (None before the graph exists)
    pub fn master_target(&self) -> Option<f32> {
        lock_graph(&self.inner.ctx.graph)
            .as_ref()
            .map(|graph| graph.master().target())
    }

    /// Whether a snippet wake or sleep-timer countdown is pending
    pub async fn has_pending_timers(&self) -> bool {
        let control = self.inner.control.lock().await;
        control.scheduler.is_running() || control.timer.is_armed()
    }

    /// Scheduler run tasks still alive
    pub async fn active_scheduler_loops(&self) -> usize {
        self.inner.control.lock().await.scheduler.active_loops()
    }

    /// Time left on the sleep timer
    pub async fn sleep_remaining(&self) -> Option<Duration> {
        self.inner.control.lock().await.timer.remaining()
    }
}
