//! Message types for actor-based communication
//!
//! This module defines the commands sent from an [`EngineHandle`] to the engine
//! task. Each carries a oneshot sender for the reply, so callers await a typed
//! result while all state stays inside the single engine task.
//!
//! [`EngineHandle`]: crate::engine::EngineHandle

use crate::engine::{EngineStatus, RunSummary, Sample};
use crate::error::EngineResult;
use crate::experiment::Step;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands that can be sent to the engine
#[derive(Debug)]
pub enum EngineCommand {
    /// Append one step; replies with the new queue length
    Append {
        step: Step,
        response: oneshot::Sender<usize>,
    },

    /// Append several steps in order; replies with the new queue length
    Extend {
        steps: Vec<Step>,
        response: oneshot::Sender<usize>,
    },

    /// Remove the step at an index
    RemoveAt {
        index: usize,
        response: oneshot::Sender<EngineResult<Step>>,
    },

    /// Empty the queue
    Clear {
        response: oneshot::Sender<EngineResult<()>>,
    },

    /// Append the steps stored in an experiment file; replies with the number loaded
    Load {
        path: PathBuf,
        response: oneshot::Sender<EngineResult<usize>>,
    },

    /// Save the queue to an experiment file
    Save {
        path: PathBuf,
        response: oneshot::Sender<EngineResult<()>>,
    },

    /// Copy of the queue
    Steps {
        response: oneshot::Sender<Vec<Step>>,
    },

    /// Numbered one-line summaries of the queue
    Summary {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Start playing the queue
    Run {
        response: oneshot::Sender<EngineResult<RunSummary>>,
    },

    /// Cancel the active run; replies `true` if a run was stopped
    Stop {
        response: oneshot::Sender<EngineResult<bool>>,
    },

    /// Current phase, position and elapsed time
    Status {
        response: oneshot::Sender<EngineStatus>,
    },

    /// Restart telemetry sampling with an empty series
    OpenSensorView {
        response: oneshot::Sender<EngineResult<()>>,
    },

    /// Stop telemetry sampling
    CloseSensorView { response: oneshot::Sender<()> },

    /// Samples with `sequence_index >= cursor`
    SamplesSince {
        cursor: u64,
        response: oneshot::Sender<Vec<Sample>>,
    },

    /// Turn the device off if running and stop the engine task
    Shutdown { response: oneshot::Sender<()> },
}
