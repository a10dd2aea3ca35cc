// Common scheduler-facing types

use serde::{Deserialize, Serialize};

/// Lifecycle state of an analysis scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SchedulerState {
    /// Not started yet, or stopped and reset.
    Idle,

    /// Tick loop armed and running.
    Running { started_at: f64 },

    /// Stopped; an in-flight tick may still have completed after this.
    Stopped,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Why a tick was suppressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SkipReason {
    /// Waiting for a user-input trigger that has not arrived.
    UserInput,

    /// The fill buffer holds fewer elements than the threshold.
    RequireFill { have: usize, need: usize },

    /// Current experiment time is outside the timed-run window.
    TimedRun { experiment_time: f64 },
}

/// Events emitted by the scheduler, one subscriber stream per session.
/// `WillUpdate` and `DidUpdate` pair 1:1 around every executed tick;
/// gated ticks emit `Skipped` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum AnalysisEvent {
    StateChanged { state: SchedulerState },
    WillUpdate { cycle: u64 },
    DidUpdate { cycle: u64, duration_ms: f64 },
    Skipped { cycle: u64, reason: SkipReason },
}

/// Counters describing a scheduler's activity so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks_executed: u64,
    pub ticks_skipped: u64,
    pub last_tick_ms: f64,
}
