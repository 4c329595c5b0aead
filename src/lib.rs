//! Core library for the illumicell light-stimulation controller.
//!
//! An experiment is an ordered queue of light steps (continuous, dark, pulsing,
//! advanced pulsing). The [`engine`] plays the queue against a light controller
//! reached through an [`adapters::DeviceTransport`], one text frame per step,
//! and samples the controller's sensor telemetry while a run is active.
//!
//! - [`experiment`]: steps, the queue and the experiment file format
//! - [`protocol`]: the line-oriented wire format
//! - [`engine`]: the single-task scheduler, its observer and telemetry sampler
//! - [`adapters`]: serial and mock transports
//! - [`config`], [`logging`], [`error`]: the ambient stack

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod messages;
pub mod protocol;
