//! Snippet scheduler
//!
//! Drives the `Idle -> Scheduled -> Attempting -> Scheduled` cycle. Each run is
//! one task sleeping until its next wake; a per-run `watch` channel carries the
//! liveness flag so a stop takes effect at the next await point.
//!
//! Only one attempt is ever in flight: the outcome of attempt N (including the
//! catalog update) is applied before attempt N+1 selects an episode.

use crate::audio::cache::DecodedAudioCache;
use crate::audio::types::DecodedAudio;
use crate::catalog::{Episode, EpisodeCatalog, OutcomeEffect};
use crate::error::{Error, Result};
use crate::graph::{lock_graph, SharedGraph};
use crate::state::SharedState;
use rand::rngs::StdRng;
use rand::Rng;
use sleepcast_common::events::SessionEvent;
use sleepcast_common::SessionConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Gap before retrying after a failed attempt
pub const FAILURE_RETRY: Duration = Duration::from_secs(1);

const NO_EPISODES: &str = "No episodes available";

/// Scheduler state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    /// Sleeping until `wake`
    Scheduled { wake: Instant },
    /// Fetch, decode and play in flight
    Attempting,
}

/// Everything an attempt touches, shared with the session
#[derive(Clone)]
pub struct SchedulerContext {
    pub catalog: Arc<RwLock<EpisodeCatalog>>,
    pub cache: Arc<DecodedAudioCache>,
    pub graph: SharedGraph,
    pub config: Arc<StdRwLock<SessionConfig>>,
    pub rng: Arc<Mutex<StdRng>>,
    pub state: Arc<SharedState>,
}

impl SchedulerContext {
    fn config(&self) -> SessionConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gap after a successful attempt
    fn success_gap(&self) -> Duration {
        let config = self.config();
        let secs = self
            .rng()
            .gen_range(config.min_gap_secs..=config.max_gap_secs);
        Duration::from_secs_f64(secs)
    }

    /// Snippet duration and start offset within a clip
    fn snippet_window(&self, clip: &DecodedAudio) -> (f64, f64) {
        let config = self.config();
        let mut rng = self.rng();
        let duration = rng.gen_range(config.min_length_secs..=config.max_length_secs);
        let max_offset = (clip.duration_secs() - duration).max(0.0);
        let offset = rng.gen_range(0.0..=max_offset);
        (offset, duration)
    }
}

/// Decrements the loop counter when a run task ends or is dropped
struct LoopGuard(Arc<AtomicUsize>);

impl LoopGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snippet scheduler
pub struct SnippetScheduler {
    ctx: SchedulerContext,
    phase: Arc<Mutex<SchedulerPhase>>,
    /// Liveness sender of the current run
    live: Option<watch::Sender<bool>>,
    loops: Arc<AtomicUsize>,
}

impl SnippetScheduler {
    pub fn new(ctx: SchedulerContext) -> Self {
        Self {
            ctx,
            phase: Arc::new(Mutex::new(SchedulerPhase::Idle)),
            live: None,
            loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Begin a run with an immediate attempt
    ///
    /// Starting a running scheduler is a no-op.
    ///
    /// # Errors
    /// `NoEpisodes` when the catalog is empty; the scheduler stays idle.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Scheduler already running");
            return Ok(());
        }

        if self.ctx.catalog.read().await.is_empty() {
            warn!("{}", NO_EPISODES);
            self.ctx
                .state
                .record_outcome(false, NO_EPISODES.to_string())
                .await;
            return Err(Error::NoEpisodes);
        }

        let (live_tx, live_rx) = watch::channel(true);
        *lock(&self.phase) = SchedulerPhase::Scheduled {
            wake: Instant::now(),
        };
        self.live = Some(live_tx);

        let guard = LoopGuard::new(&self.loops);
        let ctx = self.ctx.clone();
        let phase = Arc::clone(&self.phase);
        tokio::spawn(async move {
            let _guard = guard;
            run(ctx, phase, live_rx).await;
        });

        debug!("Scheduler started");
        Ok(())
    }

    /// Return to idle, cancelling the pending wake
    ///
    /// An attempt already in flight may complete but its outcome is
    /// discarded. Idempotent.
    pub fn stop(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        let mut phase = lock(&self.phase);
        live.send_replace(false);
        *phase = SchedulerPhase::Idle;
        debug!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    pub fn phase(&self) -> SchedulerPhase {
        *lock(&self.phase)
    }

    /// Wake time of the pending attempt, if one is scheduled
    pub fn next_wake(&self) -> Option<Instant> {
        match self.phase() {
            SchedulerPhase::Scheduled { wake } => Some(wake),
            _ => None,
        }
    }

    /// Run tasks still alive (a stopped run lingers until its in-flight
    /// attempt returns)
    pub fn active_loops(&self) -> usize {
        self.loops.load(Ordering::SeqCst)
    }
}

impl Drop for SnippetScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(phase: &Mutex<SchedulerPhase>) -> MutexGuard<'_, SchedulerPhase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move to `next` unless the run was stopped
fn advance(phase: &Mutex<SchedulerPhase>, live: &watch::Receiver<bool>, next: SchedulerPhase) -> bool {
    let mut phase = lock(phase);
    if !*live.borrow() {
        return false;
    }
    *phase = next;
    true
}

async fn run(ctx: SchedulerContext, phase: Arc<Mutex<SchedulerPhase>>, mut live: watch::Receiver<bool>) {
    let mut gap = Duration::ZERO;
    loop {
        let wake = Instant::now() + gap;
        if !advance(&phase, &live, SchedulerPhase::Scheduled { wake }) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = live.changed() => return,
        }

        if !advance(&phase, &live, SchedulerPhase::Attempting) {
            return;
        }

        let Some(success) = attempt(&ctx, &live).await else {
            return;
        };
        if !*live.borrow() {
            return;
        }

        gap = if success {
            ctx.success_gap()
        } else {
            FAILURE_RETRY
        };
        debug!("Next snippet attempt in {:.1}s", gap.as_secs_f64());
    }
}

/// One selection, fetch and play
///
/// Returns `None` when the run was stopped while the fetch was in flight.
async fn attempt(ctx: &SchedulerContext, live: &watch::Receiver<bool>) -> Option<bool> {
    let selected = {
        let catalog = ctx.catalog.read().await;
        let mut rng = ctx.rng();
        catalog.select_random(&mut *rng)
    };

    let Some(episode) = selected else {
        warn!("{}", NO_EPISODES);
        ctx.state
            .record_outcome(false, NO_EPISODES.to_string())
            .await;
        ctx.state.broadcast_event(SessionEvent::SnippetFailed {
            audio_url: None,
            failure_count: 0,
            message: NO_EPISODES.to_string(),
            timestamp: chrono::Utc::now(),
        });
        return Some(false);
    };

    ctx.state.record_attempt().await;
    debug!(url = %episode.audio_url, "Attempting snippet from \"{}\"", episode.title);

    let result = ctx.cache.get(&episode.audio_url).await;
    if !*live.borrow() {
        debug!(url = %episode.audio_url, "Discarding snippet attempt after stop");
        return None;
    }

    match result {
        Ok(buffer) => {
            play(ctx, &episode, buffer).await;
            Some(true)
        }
        Err(e) => {
            fail(ctx, &episode, &e).await;
            Some(false)
        }
    }
}

async fn play(ctx: &SchedulerContext, episode: &Episode, buffer: Arc<DecodedAudio>) {
    let (offset_secs, duration_secs) = ctx.snippet_window(&buffer);
    if let Some(graph) = lock_graph(&ctx.graph).as_mut() {
        graph.play_snippet(buffer, offset_secs, duration_secs);
    }

    ctx.catalog
        .write()
        .await
        .record_outcome(&episode.audio_url, true);

    info!(
        "Playing \"{}\" at {:.1}s for {:.1}s",
        episode.title, offset_secs, duration_secs
    );
    ctx.state
        .record_outcome(true, format!("Playing \"{}\"", episode.title))
        .await;
    ctx.state.broadcast_event(SessionEvent::SnippetStarted {
        episode_title: episode.title.clone(),
        audio_url: episode.audio_url.clone(),
        offset_secs,
        duration_secs,
        timestamp: chrono::Utc::now(),
    });
}

async fn fail(ctx: &SchedulerContext, episode: &Episode, error: &Error) {
    let (effect, summary) = {
        let mut catalog = ctx.catalog.write().await;
        let effect = catalog.record_outcome(&episode.audio_url, false);
        (effect, catalog.summary())
    };

    let message = match effect {
        OutcomeEffect::Evicted(removed) => {
            let message = format!("Removed failing episode: {}", removed.title);
            warn!("{} ({})", message, error);
            ctx.state.broadcast_event(SessionEvent::EpisodeEvicted {
                episode_title: removed.title,
                audio_url: removed.audio_url,
                timestamp: chrono::Utc::now(),
            });
            ctx.state.broadcast_event(SessionEvent::CatalogChanged {
                total_episodes: summary.total_episodes,
                user_episodes: summary.user_episodes,
                curated_episodes: summary.curated_episodes,
                timestamp: chrono::Utc::now(),
            });
            message
        }
        OutcomeEffect::Recorded { failure_count } => {
            let message = format!("Snippet failed ({}x): {}", failure_count, error);
            warn!(url = %episode.audio_url, "{}", message);
            ctx.state.broadcast_event(SessionEvent::SnippetFailed {
                audio_url: Some(episode.audio_url.clone()),
                failure_count,
                message: message.clone(),
                timestamp: chrono::Utc::now(),
            });
            message
        }
        OutcomeEffect::Unknown => {
            let message = format!("Snippet failed: {}", error);
            debug!(url = %episode.audio_url, "{} (episode no longer in catalog)", message);
            message
        }
    };

    ctx.state.record_outcome(false, message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::AudioDecoder;
    use crate::audio::fetch::{AudioFetcher, FetchedAudio};
    use crate::catalog::{FeedEpisode, Provenance};
    use crate::graph::reverb::ImpulseResponse;
    use crate::graph::MixingGraph;
    use futures::future::BoxFuture;
    use rand::SeedableRng;

    const RATE: u32 = 8000;

    const SLOW_FETCH: Duration = Duration::from_secs(5);

    /// Fails every URL containing "bad"; URLs containing "slow" take
    /// [`SLOW_FETCH`] to arrive
    struct StubFetcher;

    impl AudioFetcher for StubFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchedAudio>> {
            Box::pin(async move {
                if url.contains("slow") {
                    tokio::time::sleep(SLOW_FETCH).await;
                }
                if url.contains("bad") {
                    Err(Error::Fetch {
                        status: 404,
                        message: "missing".to_string(),
                    })
                } else {
                    Ok(FetchedAudio {
                        bytes: vec![0; 4],
                        content_type: "audio/wav".to_string(),
                        note: None,
                    })
                }
            })
        }
    }

    /// Thirty seconds of quiet stereo at the test rate
    struct StubDecoder;

    impl AudioDecoder for StubDecoder {
        fn decode(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<DecodedAudio> {
            Ok(DecodedAudio {
                samples: vec![0.1; RATE as usize * 30 * 2],
                sample_rate: RATE,
            })
        }
    }

    async fn context(urls: &[&str]) -> SchedulerContext {
        let mut catalog = EpisodeCatalog::new(10);
        catalog.add_feed("https://example.com/feed", "Feed", Provenance::User);
        catalog
            .add_episodes(
                "https://example.com/feed",
                urls.iter().map(|url| FeedEpisode {
                    title: format!("Episode {}", url),
                    audio_url: url.to_string(),
                }),
            )
            .unwrap();

        let config = SessionConfig::default();
        let impulse = ImpulseResponse {
            channels: [vec![0.0; 64], vec![0.0; 64]],
            sample_rate: RATE,
        };
        SchedulerContext {
            catalog: Arc::new(RwLock::new(catalog)),
            cache: Arc::new(DecodedAudioCache::new(
                Arc::new(StubFetcher),
                Arc::new(StubDecoder),
                RATE,
            )),
            graph: Arc::new(Mutex::new(Some(MixingGraph::new(RATE, &impulse, &config)))),
            config: Arc::new(StdRwLock::new(config)),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(11))),
            state: Arc::new(SharedState::default()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_catalog_stays_idle() {
        let ctx = context(&[]).await;
        let state = Arc::clone(&ctx.state);
        let mut scheduler = SnippetScheduler::new(ctx);

        assert!(matches!(scheduler.start().await, Err(Error::NoEpisodes)));
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert!(!scheduler.is_running());
        assert_eq!(
            state.diagnostics().await.last_outcome.as_deref(),
            Some(NO_EPISODES)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_schedules_gap() {
        let ctx = context(&["https://example.com/good.mp3"]).await;
        let state = Arc::clone(&ctx.state);
        let graph = Arc::clone(&ctx.graph);
        let mut scheduler = SnippetScheduler::new(ctx);

        let started = Instant::now();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let diagnostics = state.diagnostics().await;
        assert_eq!(diagnostics.attempt_count, 1);
        assert_eq!(diagnostics.success_count, 1);
        assert_eq!(
            diagnostics.last_outcome.as_deref(),
            Some("Playing \"Episode https://example.com/good.mp3\"")
        );
        assert_eq!(lock_graph(&graph).as_ref().unwrap().active_snippet_voices(), 1);

        let wake = scheduler.next_wake().expect("attempt scheduled");
        let gap = wake - started;
        assert!(gap >= Duration::from_secs(6), "gap {:?}", gap);
        assert!(gap <= Duration::from_secs(19), "gap {:?}", gap);

        scheduler.stop();
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_after_one_second() {
        let ctx = context(&["https://example.com/bad.mp3"]).await;
        let state = Arc::clone(&ctx.state);
        let mut scheduler = SnippetScheduler::new(ctx);

        let started = Instant::now();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            state.diagnostics().await.last_outcome.as_deref(),
            Some("Snippet failed (1x): Audio fetch failed (404): missing")
        );
        let wake = scheduler.next_wake().expect("retry scheduled");
        assert_eq!(wake - started, FAILURE_RETRY);

        // Second and third failures evict the only episode
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(
            state.diagnostics().await.last_outcome.as_deref(),
            Some("Removed failing episode: Episode https://example.com/bad.mp3")
        );

        // An empty catalog keeps retrying every second
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(
            state.diagnostics().await.last_outcome.as_deref(),
            Some(NO_EPISODES)
        );
        assert_eq!(state.diagnostics().await.attempt_count, 3);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_run() {
        let ctx = context(&["https://example.com/good.mp3"]).await;
        let mut scheduler = SnippetScheduler::new(ctx);

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.active_loops(), 1);

        scheduler.stop();
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.active_loops(), 0);
        assert_eq!(scheduler.next_wake(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_discards_outcome() {
        let url = "https://example.com/slow.mp3";
        let ctx = context(&[url]).await;
        let state = Arc::clone(&ctx.state);
        let graph = Arc::clone(&ctx.graph);
        let cache = Arc::clone(&ctx.cache);
        let mut scheduler = SnippetScheduler::new(ctx);

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.phase(), SchedulerPhase::Attempting);
        assert_eq!(scheduler.active_loops(), 1);

        scheduler.stop();
        tokio::time::sleep(SLOW_FETCH + Duration::from_secs(1)).await;

        let diagnostics = state.diagnostics().await;
        assert_eq!(diagnostics.attempt_count, 1);
        assert_eq!(diagnostics.success_count, 0);
        assert_eq!(lock_graph(&graph).as_ref().unwrap().active_snippet_voices(), 0);
        assert_eq!(scheduler.active_loops(), 0);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        // The fetched clip is still kept for later runs
        assert!(cache.contains(url).await);
    }
}
