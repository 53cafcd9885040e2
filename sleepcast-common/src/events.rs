//! Event types for the Sleepcast event system
//!
//! Provides shared event definitions and the [`EventBus`] used by a playback
//! session to publish state changes, snippet outcomes and timer ticks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Externally visible playback status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing playing, all timers cancelled, gains at zero
    Idle,
    /// Noise bed running and snippets scheduled
    Playing,
    /// Master gain ramping to zero after a stop
    Stopping,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// Stop requested by the listener
    User,
    /// Sleep timer elapsed
    Timer,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::User => write!(f, "user"),
            StopReason::Timer => write!(f, "timer"),
        }
    }
}

/// Sleepcast event types
///
/// Events are broadcast via [`EventBus`] and serialize with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Playback state changed
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        /// Set when the change was caused by a stop
        reason: Option<StopReason>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A snippet started playing
    SnippetStarted {
        episode_title: String,
        audio_url: String,
        /// Offset into the episode in seconds
        offset_secs: f64,
        /// Snippet duration in seconds
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A snippet attempt failed (the episode is still in the catalog)
    SnippetFailed {
        /// None when no episode was selectable
        audio_url: Option<String>,
        failure_count: u32,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An episode was removed after repeated failures
    EpisodeEvicted {
        episode_title: String,
        audio_url: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Catalog membership changed (feeds added, removed or evicted)
    CatalogChanged {
        total_episodes: usize,
        user_episodes: usize,
        curated_episodes: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Per-second sleep timer countdown
    SleepTimerTick {
        remaining_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new noise bed became active
    NoiseBedChanged {
        label: String,
        /// True when resolution failed and generated noise was substituted
        fallback: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SessionEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            SessionEvent::SnippetStarted { .. } => "SnippetStarted",
            SessionEvent::SnippetFailed { .. } => "SnippetFailed",
            SessionEvent::EpisodeEvicted { .. } => "EpisodeEvicted",
            SessionEvent::CatalogChanged { .. } => "CatalogChanged",
            SessionEvent::SleepTimerTick { .. } => "SleepTimerTick",
            SessionEvent::NoiseBedChanged { .. } => "NoiseBedChanged",
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::sync::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(SessionEvent::SleepTimerTick {
            remaining_secs: 12.0,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            SessionEvent::SleepTimerTick { remaining_secs, .. } => {
                assert_eq!(remaining_secs, 12.0)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(SessionEvent::NoiseBedChanged {
            label: "white".to_string(),
            fallback: false,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_serialized_tag() {
        let event = SessionEvent::PlaybackStateChanged {
            old_state: PlaybackState::Stopping,
            new_state: PlaybackState::Idle,
            reason: Some(StopReason::Timer),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PlaybackStateChanged");
        assert_eq!(json["new_state"], "idle");
        assert_eq!(json["reason"], "timer");
        assert_eq!(event.event_type(), "PlaybackStateChanged");
    }
}
