//! Custom error types for the experiment engine.
//!
//! This module defines `EngineError`, the error type returned by every queue,
//! persistence and run operation. Using the `thiserror` crate it keeps the two
//! families of failure apart:
//!
//! - **Caller-correctable** errors (`EmptyQueue`, `IndexOutOfRange`,
//!   `InvalidWhileRunning`, `NotRunning`, `InvalidStep`) are rejected before any
//!   state changes and can be fixed by the user.
//! - **Environment** errors (`DeviceFault`, `Io`, `ExperimentFile`) come from the
//!   device link or the filesystem. A `DeviceFault` during a run forces the engine
//!   back to `Idle` after a best-effort "all off".
//!
//! `MalformedTelemetry` exists so the parser can report what it rejected, but the
//! sampler never escalates it; bad lines are logged and dropped.

use crate::adapters::TransportError;
use crate::experiment::StepError;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors returned by engine, queue and file operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Run or save requested on an empty queue.
    #[error("No steps in the experiment queue")]
    EmptyQueue,

    /// `remove_at` past the end of the queue.
    #[error("Step index {index} is out of range (queue has {len} steps)")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Queue length at the time.
        len: usize,
    },

    /// Queue edit or second run while a run is active.
    #[error("Operation not allowed while an experiment is running")]
    InvalidWhileRunning,

    /// Needs an active run.
    #[error("No experiment is running")]
    NotRunning,

    /// The transport failed to deliver a frame.
    #[error("Device fault: {0}")]
    DeviceFault(#[source] TransportError),

    /// A telemetry line was not a plain decimal number.
    #[error("Malformed telemetry line: {0:?}")]
    MalformedTelemetry(String),

    /// Step parameters failed validation.
    #[error("Invalid step: {0}")]
    InvalidStep(#[from] StepError),

    /// The experiment file is not valid JSON of step records.
    #[error("Experiment file error: {0}")]
    ExperimentFile(#[from] serde_json::Error),

    /// Reading or writing an experiment file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine task is gone.
    #[error("Engine has shut down")]
    EngineClosed,
}

impl EngineError {
    /// True for errors raised by the device link rather than by the caller.
    pub fn is_device_fault(&self) -> bool {
        matches!(self, EngineError::DeviceFault(_))
    }
}
