//! Sleep timer
//!
//! Counts down once per second and runs a callback when the deadline passes.

use crate::state::SharedState;
use sleepcast_common::events::SessionEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Countdown tick interval
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct ActiveTimer {
    handle: JoinHandle<()>,
    deadline: Instant,
}

/// Session sleep timer
pub struct SleepTimer {
    state: Arc<SharedState>,
    active: Option<ActiveTimer>,
}

impl SleepTimer {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            state,
            active: None,
        }
    }

    /// Arm for `minutes`, replacing any running countdown
    ///
    /// Non-finite or non-positive durations are ignored. `on_elapsed` runs
    /// once, from the timer task, at the first tick past the deadline.
    pub fn arm<F>(&mut self, minutes: f64, on_elapsed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !minutes.is_finite() || minutes <= 0.0 {
            debug!("Ignoring sleep timer of {} minutes", minutes);
            return;
        }
        self.disarm();

        let deadline = Instant::now() + Duration::from_secs_f64(minutes * 60.0);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            loop {
                ticks.tick().await;
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    info!("Sleep timer elapsed");
                    on_elapsed();
                    return;
                }
                state.broadcast_event(SessionEvent::SleepTimerTick {
                    remaining_secs: remaining.as_secs_f64(),
                    timestamp: chrono::Utc::now(),
                });
            }
        });

        info!("Sleep timer armed for {:.1} minutes", minutes);
        self.active = Some(ActiveTimer { handle, deadline });
    }

    /// Cancel the countdown (idempotent)
    pub fn disarm(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
            debug!("Sleep timer disarmed");
        }
    }

    /// Whether a countdown is pending
    pub fn is_armed(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| !active.handle.is_finished())
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.active
            .as_ref()
            .filter(|active| !active.handle.is_finished())
            .map(|active| active.deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
