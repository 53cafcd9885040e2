//! Shared session state
//!
//! Status and diagnostics shared between the session, the snippet scheduler
//! and the sleep timer, plus the event bus they publish on.

use sleepcast_common::events::{EventBus, PlaybackState, SessionEvent, StopReason};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Externally visible session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Nothing playing; `last_stop` tells why the previous run ended
    Idle { last_stop: Option<StopReason> },
    Playing,
    /// Master gain is ramping down; reported until the ramp completes
    Stopping { reason: StopReason },
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle { last_stop: None }
    }
}

impl SessionStatus {
    pub fn playback_state(&self) -> PlaybackState {
        match self {
            SessionStatus::Idle { .. } => PlaybackState::Idle,
            SessionStatus::Playing => PlaybackState::Playing,
            SessionStatus::Stopping { .. } => PlaybackState::Stopping,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, SessionStatus::Playing)
    }

    /// Stop reason for `Stopping` and `Idle` after a stop
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            SessionStatus::Idle { last_stop } => *last_stop,
            SessionStatus::Playing => None,
            SessionStatus::Stopping { reason } => Some(*reason),
        }
    }
}

/// Per-session snippet diagnostics
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Snippet attempts that reached the fetch stage
    pub attempt_count: u64,
    pub success_count: u64,
    /// Human readable outcome of the last attempt
    pub last_outcome: Option<String>,
    /// When the scheduler wakes next (None while idle or attempting);
    /// filled in from the scheduler when diagnostics are read
    pub next_attempt_at: Option<Instant>,
}

impl Diagnostics {
    /// Time until the next attempt
    pub fn next_attempt_eta(&self) -> Option<Duration> {
        self.next_attempt_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Shared state accessible by all session components
///
/// Locks are held only for the duration of a read or write, never across an
/// await.
pub struct SharedState {
    status: RwLock<SessionStatus>,
    diagnostics: RwLock<Diagnostics>,
    events: EventBus,
}

impl SharedState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            status: RwLock::new(SessionStatus::default()),
            diagnostics: RwLock::new(Diagnostics::default()),
            events: EventBus::new(event_capacity),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Broadcast an event (no listeners is fine)
    pub fn broadcast_event(&self, event: SessionEvent) {
        self.events.emit_lossy(event);
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    /// Replace the status and broadcast the transition
    ///
    /// Returns the previous status. Setting an identical status broadcasts
    /// nothing.
    pub async fn set_status(&self, status: SessionStatus) -> SessionStatus {
        let old = {
            let mut current = self.status.write().await;
            std::mem::replace(&mut *current, status)
        };
        if old != status {
            self.broadcast_event(SessionEvent::PlaybackStateChanged {
                old_state: old.playback_state(),
                new_state: status.playback_state(),
                reason: status.stop_reason(),
                timestamp: chrono::Utc::now(),
            });
        }
        old
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Start a fresh run of diagnostics
    pub async fn reset_diagnostics(&self, message: &str) {
        *self.diagnostics.write().await = Diagnostics {
            last_outcome: Some(message.to_string()),
            ..Diagnostics::default()
        };
    }

    pub async fn record_attempt(&self) {
        self.diagnostics.write().await.attempt_count += 1;
    }

    /// Record the outcome message; `success` bumps the success counter
    pub async fn record_outcome(&self, success: bool, message: String) {
        let mut diagnostics = self.diagnostics.write().await;
        if success {
            diagnostics.success_count += 1;
        }
        diagnostics.last_outcome = Some(message);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(EventBus::default().capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_transitions_broadcast() {
        let state = SharedState::new(16);
        let mut rx = state.subscribe_events();

        assert_eq!(state.status().await, SessionStatus::Idle { last_stop: None });
        state.set_status(SessionStatus::Playing).await;
        state
            .set_status(SessionStatus::Stopping {
                reason: StopReason::Timer,
            })
            .await;

        match rx.recv().await.unwrap() {
            SessionEvent::PlaybackStateChanged {
                old_state,
                new_state,
                reason,
                ..
            } => {
                assert_eq!(old_state, PlaybackState::Idle);
                assert_eq!(new_state, PlaybackState::Playing);
                assert_eq!(reason, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SessionEvent::PlaybackStateChanged { reason, .. } => {
                assert_eq!(reason, Some(StopReason::Timer));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_status_is_silent() {
        let state = SharedState::new(16);
        state.set_status(SessionStatus::Playing).await;
        let mut rx = state.subscribe_events();
        state.set_status(SessionStatus::Playing).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_counters() {
        let state = SharedState::default();
        state.record_attempt().await;
        state.record_attempt().await;
        state.record_outcome(true, "Playing \"A\"".to_string()).await;
        state.record_outcome(false, "Snippet failed (1x): boom".to_string()).await;

        let diagnostics = state.diagnostics().await;
        assert_eq!(diagnostics.attempt_count, 2);
        assert_eq!(diagnostics.success_count, 1);
        assert_eq!(
            diagnostics.last_outcome.as_deref(),
            Some("Snippet failed (1x): boom")
        );

        state.reset_diagnostics("Starting playback...").await;
        let diagnostics = state.diagnostics().await;
        assert_eq!(diagnostics.attempt_count, 0);
        assert_eq!(diagnostics.last_outcome.as_deref(), Some("Starting playback..."));
    }
}
