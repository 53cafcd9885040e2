//! Sleepcast - main entry point
//!
//! Loads feeds, starts a playback session on the selected output device and
//! plays until interrupted or until the sleep timer ends the session.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sleepcast_common::config::{resolve_config_path, TomlConfig};
use sleepcast_common::events::{PlaybackState, SessionEvent, StopReason};
use sleepcast_player::audio::AudioOutput;
use sleepcast_player::feed_store::FeedStore;
use sleepcast_player::noise::NoiseSource;
use sleepcast_player::Session;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for sleepcast
#[derive(Parser, Debug)]
#[command(name = "sleepcast")]
#[command(about = "Generative ambient sleep-sound player built from podcast snippets")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to $SLEEPCAST_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subscribe to a podcast feed (repeatable); subscriptions are remembered
    #[arg(short, long = "feed", value_name = "URL")]
    feeds: Vec<String>,

    /// Load the current top podcasts as curated feeds
    #[arg(long)]
    top: bool,

    /// Country code for the top list
    #[arg(long, env = "SLEEPCAST_COUNTRY")]
    country: Option<String>,

    /// Genre id for the top list
    #[arg(long)]
    genre: Option<String>,

    /// Stop playback after this many minutes (0 disables)
    #[arg(short, long, env = "SLEEPCAST_SLEEP_MINUTES")]
    sleep_minutes: Option<f64>,

    /// Noise preset (white, pink, brown or a configured preset)
    #[arg(long, conflicts_with_all = ["noise_url", "noise_file"])]
    noise: Option<String>,

    /// Noise loop fetched from a URL
    #[arg(long, conflicts_with = "noise_file")]
    noise_url: Option<String>,

    /// Noise loop read from a local file
    #[arg(long)]
    noise_file: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, env = "SLEEPCAST_DEVICE")]
    device: Option<String>,

    /// Seed for snippet selection and timing
    #[arg(long)]
    seed: Option<u64>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is read before logging so its level can apply
    let config_path = resolve_config_path(args.config.as_deref());
    let (config, config_error) = match config_path.as_deref() {
        Some(path) => match TomlConfig::load_from(path) {
            Ok(config) => (config, None),
            Err(e) => (TomlConfig::default(), Some(e)),
        },
        None => (TomlConfig::default(), None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting sleepcast {} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    match (&config_path, config_error) {
        (Some(path), Some(e)) => warn!(
            "Failed to load configuration from {}: {} - using defaults",
            path.display(),
            e
        ),
        (Some(path), None) => info!("Configuration: {}", path.display()),
        (None, _) => info!("No configuration file, using defaults"),
    }

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let device = args.device.as_deref().or(config.audio.device.as_deref());
    let mut output = AudioOutput::open(device).context("Failed to open audio output")?;

    let mut session_config = config.session;
    if let Some(minutes) = args.sleep_minutes {
        session_config.sleep_minutes = minutes;
    }

    let mut builder = Session::builder()
        .config(session_config.sanitized())
        .sample_rate(output.sample_rate())
        .noise_presets(config.noise.presets.clone())
        .crossfade_curve(config.noise.crossfade_curve)
        .curated_capacity(config.feeds.curated_capacity);
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    let session = builder.build().context("Failed to create session")?;

    tokio::spawn(log_events(session.subscribe_events()));
    let mut lifecycle = session.subscribe_events();

    load_feeds(&session, &args, &config).await;

    let noise = if let Some(url) = &args.noise_url {
        Some(NoiseSource::Url(url.clone()))
    } else if let Some(path) = &args.noise_file {
        Some(NoiseSource::File(path.clone()))
    } else {
        args.noise
            .as_deref()
            .or(config.noise.default_source.as_deref())
            .map(NoiseSource::parse)
    };
    if let Some(source) = noise {
        session.select_noise(source).await;
    }

    session
        .start()
        .await
        .context("Nothing to play; subscribe to a feed with --feed or load the top list with --top")?;
    output
        .start(session.graph())
        .context("Failed to start audio output")?;

    tokio::select! {
        _ = shutdown_signal() => {
            session.stop(StopReason::User).await;
        }
        _ = wait_until_idle(&mut lifecycle) => {}
    }

    if session.is_playing().await || session.status().await.playback_state() == PlaybackState::Stopping {
        // Let the fade-out finish before closing the device
        if tokio::time::timeout(Duration::from_secs(3), wait_until_idle(&mut lifecycle))
            .await
            .is_err()
        {
            debug!("Fade-out did not report idle in time");
        }
    }

    output.stop();
    if output.has_error() {
        warn!("Audio stream reported {} errors", output.error_count());
    }
    info!("Shutdown complete");
    Ok(())
}

/// Filter used when RUST_LOG is unset
fn default_filter(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        "sleepcast_player=info,sleepcast=info".to_string()
    } else if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("sleepcast_player={0},sleepcast={0}", level)
    }
}

/// Stored subscriptions, command-line feeds and optionally the top list
async fn load_feeds(session: &Session, args: &Args, config: &TomlConfig) {
    let store = FeedStore::new(config.feed_store_path());
    let stored = store.load().unwrap_or_else(|e| {
        warn!("Could not read {}: {}", store.path().display(), e);
        Vec::new()
    });
    for feed in &stored {
        if let Err(e) = session.subscribe(&feed.feed_url).await {
            warn!("Stored feed {} unavailable: {}", feed.feed_url, e);
        }
    }

    let mut subscribed = false;
    for url in &args.feeds {
        match session.subscribe(url).await {
            Ok(_) => subscribed = true,
            Err(e) => error!("Could not subscribe to {}: {}", url, e),
        }
    }
    if subscribed {
        let mut feeds = session.user_feeds().await;
        // Keep stored feeds that were unreachable this time
        for stored in &stored {
            if !feeds.iter().any(|f| f.feed_url == stored.feed_url) {
                feeds.push(sleepcast_player::Feed {
                    feed_url: stored.feed_url.clone(),
                    title: stored.title.clone(),
                    provenance: sleepcast_player::Provenance::User,
                });
            }
        }
        if let Err(e) = store.save(&feeds) {
            warn!("Could not save subscriptions: {}", e);
        }
    }

    let empty = session.catalog_summary().await.total_episodes == 0;
    if args.top || empty {
        let country = args
            .country
            .as_deref()
            .unwrap_or(config.feeds.top_country.as_str());
        let genre = args.genre.as_deref().or(config.feeds.top_genre.as_deref());
        match session.load_top(Some(country), genre).await {
            Ok(report) => {
                if let Some(warning) = report.warning {
                    warn!("{}", warning);
                }
            }
            Err(e) => error!("Top list failed: {}", e),
        }
    }

    let summary = session.catalog_summary().await;
    info!(
        "Catalog: {} episodes ({} user, {} curated) from {} feeds",
        summary.total_episodes, summary.user_episodes, summary.curated_episodes, summary.feeds
    );
}

/// Log session events until the session is dropped
async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event {
                SessionEvent::PlaybackStateChanged {
                    new_state, reason, ..
                } => match reason {
                    Some(reason) => info!("Playback {} ({})", new_state, reason),
                    None => info!("Playback {}", new_state),
                },
                SessionEvent::SnippetStarted {
                    episode_title,
                    duration_secs,
                    ..
                } => info!("Snippet: \"{}\" ({:.0}s)", episode_title, duration_secs),
                SessionEvent::SnippetFailed { message, .. } => debug!("{}", message),
                SessionEvent::EpisodeEvicted { episode_title, .. } => {
                    warn!("Removed failing episode: {}", episode_title)
                }
                SessionEvent::SleepTimerTick { remaining_secs, .. } => {
                    let remaining = remaining_secs.ceil() as u64;
                    if remaining % 60 == 0 || remaining <= 10 {
                        info!("Sleep timer: {}:{:02} left", remaining / 60, remaining % 60);
                    }
                }
                SessionEvent::NoiseBedChanged { label, fallback, .. } => {
                    if fallback {
                        warn!("Noise bed: {} (fallback)", label);
                    } else {
                        info!("Noise bed: {}", label);
                    }
                }
                other => debug!("Event: {}", other.event_type()),
            },
            Err(RecvError::Lagged(skipped)) => debug!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolve once the session reports idle
async fn wait_until_idle(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::PlaybackStateChanged {
                new_state: PlaybackState::Idle,
                ..
            }) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, fading out");
        },
        _ = terminate => {
            info!("Received terminate signal, fading out");
        },
    }
}
