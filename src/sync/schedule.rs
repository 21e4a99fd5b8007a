//! Playback scheduling.
//!
//! A resolved action names the authority instant at which both peers should
//! start playing it. Converted to the local clock, that deadline either lies
//! ahead (wait for it), has just passed (play now) or is long gone (skip the
//! animation and jump to the snapshot).

use std::time::Duration;

use crate::sync::clock::ClockSync;

/// Scheduling thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Deadlines closer than this play immediately.
    pub schedule_threshold: Duration,
    /// Deadlines missed by more than this are skipped.
    pub max_lateness: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule_threshold: Duration::from_millis(50),
            max_lateness: Duration::from_millis(500),
        }
    }
}

/// What to do with one resolved action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackDecision {
    /// Wait, then play.
    Schedule {
        /// Time to wait.
        delay: Duration,
    },
    /// Play right away.
    PlayNow {
        /// How far past the deadline we are, ms.
        late_ms: u64,
    },
    /// Apply the snapshot without animating.
    Skip {
        /// How far past the deadline we are, ms.
        late_ms: u64,
    },
}

/// Decide how to play an action due at `start_at_server_ms`.
pub fn decide(
    config: &ScheduleConfig,
    clock: &ClockSync,
    start_at_server_ms: u64,
    now_local_ms: u64,
) -> PlaybackDecision {
    let remaining = clock.to_local(start_at_server_ms) - now_local_ms as i64;
    let threshold = config.schedule_threshold.as_millis() as i64;
    let max_lateness = config.max_lateness.as_millis() as i64;

    if remaining > threshold {
        PlaybackDecision::Schedule { delay: Duration::from_millis(remaining as u64) }
    } else if remaining >= -max_lateness {
        PlaybackDecision::PlayNow { late_ms: (-remaining).max(0) as u64 }
    } else {
        PlaybackDecision::Skip { late_ms: (-remaining) as u64 }
    }
}
