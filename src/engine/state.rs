//! Run lifecycle state owned by the engine.

use super::telemetry::Sample;
use super::timers::TimerHandle;
use crate::experiment::Step;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Scheduler phase.
///
/// `Stopping` only exists while a stop or fault tears a run down; it keeps new
/// timers from being armed during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    /// No run; the queue may be edited freely.
    #[default]
    Idle,
    /// Steps are being played.
    Running,
    /// A stop or fault is tearing the run down.
    Stopping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Wall time since the run started, split for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Elapsed {
    /// Whole hours; not wrapped at 24.
    pub hours: u64,
    /// 0..=59
    pub minutes: u8,
    /// 0..=59
    pub seconds: u8,
}

impl Elapsed {
    /// `00:00:00`
    pub const ZERO: Elapsed = Elapsed {
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    /// Split a duration, dropping sub-second precision.
    pub fn from_duration(duration: Duration) -> Self {
        let total = duration.as_secs();
        Self {
            hours: total / 3600,
            minutes: ((total % 3600) / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

/// State of the current run. Exactly one exists, inside the engine.
#[derive(Debug, Default)]
pub struct RunState {
    /// Current phase.
    pub phase: Phase,
    /// Index in `plan` of the step being played.
    pub current_index: Option<usize>,
    /// Virtual-clock instant the run started.
    pub start_time: Option<Instant>,
    /// Step and tick timers armed for this run; revoked together on stop.
    pub pending_timers: HashSet<TimerHandle>,
    /// Identifies the run in logs.
    pub run_id: Option<Uuid>,
    /// Snapshot of the queue taken when the run started.
    pub plan: Vec<Step>,
}

impl RunState {
    /// A fresh `Running` state positioned at the first step.
    pub fn started(plan: Vec<Step>, now: Instant) -> Self {
        Self {
            phase: Phase::Running,
            current_index: Some(0),
            start_time: Some(now),
            pending_timers: HashSet::new(),
            run_id: Some(Uuid::new_v4()),
            plan,
        }
    }

    /// Whether the phase is exactly `Running`.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Time since the run started, if one is active.
    pub fn elapsed(&self) -> Option<Elapsed> {
        self.start_time
            .map(|start| Elapsed::from_duration(start.elapsed()))
    }
}

/// Returned by a successful `run()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Identifies the run in logs.
    pub run_id: Uuid,
    /// Wall-clock start time.
    pub started_at: DateTime<Local>,
    /// Number of steps in the played snapshot.
    pub steps: usize,
    /// Sum of the step durations.
    pub total_duration: Duration,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Scheduler phase.
    pub phase: Phase,
    /// Step being played, if running.
    pub current_index: Option<usize>,
    /// Steps in the queue (not the running snapshot).
    pub queue_len: usize,
    /// Total duration of the queue.
    pub total_duration: Duration,
    /// Time since the run started, if running.
    pub elapsed: Option<Elapsed>,
    /// Identifier of the active run.
    pub run_id: Option<Uuid>,
    /// Most recent sensor reading of the current (or last) run.
    pub latest_sample: Option<Sample>,
}
