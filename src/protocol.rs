//! Device wire protocol.
//!
//! Commands are newline-terminated ASCII frames. Numeric fields are printed as
//! plain base-10 integers:
//!
//! | Step            | Frame                                           |
//! |-----------------|-------------------------------------------------|
//! | Continuous      | `ON {duration} {lux}\n`                         |
//! | Dark            | `OFF {duration}\n`                              |
//! | Pulsing         | `PULSING {duration} {frequency_hz} {lux}\n`     |
//! | AdvancedPulsing | `ADV_PULSING {duration} {on} {off} {lux}\n`     |
//! | all off         | `OFF\n`                                         |
//!
//! The device reports its light sensor on the same link as one decimal number
//! per line.

use crate::error::{EngineError, EngineResult};
use crate::experiment::Step;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Sentinel that returns the device to a safe, dark state.
pub const ALL_OFF: &str = "OFF\n";

#[allow(clippy::expect_used)]
static READING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("telemetry pattern is valid"));

/// A frame ready to be written to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Play one step.
    Step(&'a Step),
    /// The all-off sentinel.
    AllOff,
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AllOff => f.write_str(ALL_OFF),
            Command::Step(step) => match **step {
                Step::Continuous {
                    duration,
                    intensity,
                } => writeln!(f, "ON {} {}", duration, intensity),
                Step::Dark { duration } => writeln!(f, "OFF {}", duration),
                Step::Pulsing {
                    duration,
                    frequency_hz,
                    intensity,
                } => writeln!(f, "PULSING {} {} {}", duration, frequency_hz, intensity),
                Step::AdvancedPulsing {
                    duration,
                    on_time_ms,
                    off_time_ms,
                    intensity,
                } => writeln!(
                    f,
                    "ADV_PULSING {} {} {} {}",
                    duration, on_time_ms, off_time_ms, intensity
                ),
            },
        }
    }
}

/// Encode a step into the exact frame the device expects.
pub fn encode(step: &Step) -> String {
    Command::Step(step).to_string()
}

/// Parse one telemetry line into a sensor reading.
///
/// Surrounding whitespace (including the line terminator) is ignored. Anything
/// other than a non-negative decimal with at most one fractional part is
/// rejected with [`EngineError::MalformedTelemetry`].
pub fn parse_reading(line: &str) -> EngineResult<f64> {
    let trimmed = line.trim();
    if !READING.is_match(trimmed) {
        return Err(EngineError::MalformedTelemetry(trimmed.to_string()));
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| EngineError::MalformedTelemetry(trimmed.to_string()))
}
