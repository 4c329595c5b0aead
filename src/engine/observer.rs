//! Notifications from the engine to whatever presents it.
//!
//! The engine calls an [`EngineObserver`] and never depends on what the
//! observer does. The provided implementation forwards [`EngineEvent`]s over an
//! unbounded Tokio channel so a front end can consume them as a stream.

use super::state::Elapsed;
use super::telemetry::Sample;
use serde::Serialize;
use tokio::sync::mpsc;

/// Visual progress of one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepProgress {
    /// Not played in the current run.
    NotStarted,
    /// Being played.
    InProgress,
    /// Played to the end.
    Completed,
}

/// Receives engine notifications, always from the engine task.
pub trait EngineObserver: Send {
    /// The queue was edited or loaded.
    fn notify_queue_changed(&mut self);
    /// Step `index` of the running snapshot changed state.
    fn notify_step_progress(&mut self, index: usize, state: StepProgress);
    /// Time since the run started; once at start, then every tick.
    fn notify_elapsed(&mut self, elapsed: Elapsed);
    /// The last step ended and the device was switched off.
    fn notify_run_finished(&mut self);
    /// A transmission failed and the run was aborted.
    fn notify_run_faulted(&mut self, reason: &str);
    /// A telemetry reading was accepted.
    fn notify_sample_appended(&mut self, sample: Sample);
}

/// Observer calls as data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// See [`EngineObserver::notify_queue_changed`].
    QueueChanged,
    /// See [`EngineObserver::notify_step_progress`].
    StepProgress {
        /// Position in the running snapshot.
        index: usize,
        /// New state.
        state: StepProgress,
    },
    /// See [`EngineObserver::notify_elapsed`].
    Elapsed(Elapsed),
    /// See [`EngineObserver::notify_run_finished`].
    RunFinished,
    /// See [`EngineObserver::notify_run_faulted`].
    RunFaulted(String),
    /// See [`EngineObserver::notify_sample_appended`].
    SampleAppended(Sample),
}

/// Events are dropped once the receiver is gone.
impl EngineObserver for mpsc::UnboundedSender<EngineEvent> {
    fn notify_queue_changed(&mut self) {
        let _ = self.send(EngineEvent::QueueChanged);
    }

    fn notify_step_progress(&mut self, index: usize, state: StepProgress) {
        let _ = self.send(EngineEvent::StepProgress { index, state });
    }

    fn notify_elapsed(&mut self, elapsed: Elapsed) {
        let _ = self.send(EngineEvent::Elapsed(elapsed));
    }

    fn notify_run_finished(&mut self) {
        let _ = self.send(EngineEvent::RunFinished);
    }

    fn notify_run_faulted(&mut self, reason: &str) {
        let _ = self.send(EngineEvent::RunFaulted(reason.to_string()));
    }

    fn notify_sample_appended(&mut self, sample: Sample) {
        let _ = self.send(EngineEvent::SampleAppended(sample));
    }
}
