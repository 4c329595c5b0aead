//! Step model: one timed light instruction with typed parameters.
//!
//! Every invariant is enforced when a step is built, so a `Step` that exists is
//! always safe to encode and transmit:
//!
//! - the duration is a strictly positive number of whole seconds,
//! - the intensity is clamped to `0..=100` lux,
//! - pulse frequency and on/off times are strictly positive.
//!
//! Steps are immutable; editing a queue entry means removing it and inserting a
//! new one.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Reasons a step cannot be constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Total duration of zero seconds.
    #[error("Duration cannot be 0")]
    ZeroDuration,

    /// Hours/minutes/seconds do not fit in a `u32` of seconds.
    #[error("Duration is too long")]
    DurationOverflow,

    /// Pulsing frequency of zero.
    #[error("Pulse rate cannot be 0")]
    ZeroFrequency,

    /// Advanced pulsing on-time of zero.
    #[error("Time on (ms) cannot be 0")]
    ZeroOnTime,

    /// Advanced pulsing off-time of zero.
    #[error("Time off (ms) cannot be 0")]
    ZeroOffTime,

    /// Unrecognised step label or notation keyword.
    #[error("Unknown step type '{0}'")]
    UnknownKind(String),

    /// Malformed compact notation.
    #[error("Cannot parse step '{0}'")]
    Syntax(String),
}

/// Whole-second, non-zero step duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepDuration(NonZeroU32);

impl StepDuration {
    /// Rejects zero.
    pub fn from_secs(secs: u32) -> Result<Self, StepError> {
        NonZeroU32::new(secs)
            .map(Self)
            .ok_or(StepError::ZeroDuration)
    }

    /// Build a duration from the hours/minutes/seconds fields of the step editor.
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Result<Self, StepError> {
        let total = hours
            .checked_mul(3600)
            .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
            .and_then(|hm| hm.checked_add(seconds))
            .ok_or(StepError::DurationOverflow)?;
        Self::from_secs(total)
    }

    /// Whole seconds.
    pub fn as_secs(self) -> u32 {
        self.0.get()
    }

    /// As a `std` duration for scheduling.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(u64::from(self.0.get()))
    }
}

impl fmt::Display for StepDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LED intensity in lux, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Intensity(u8);

impl Intensity {
    /// Brightest supported setting.
    pub const MAX_LUX: u8 = 100;

    /// Clamps `lux` into the supported range.
    pub fn new(lux: u32) -> Self {
        Self(lux.min(u32::from(Self::MAX_LUX)) as u8)
    }

    /// Value in lux.
    pub fn lux(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of a [`Step`], carrying the label used in experiment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// `"Continuous light"`
    Continuous,
    /// `"No light"`
    Dark,
    /// `"Pulsing light"`
    Pulsing,
    /// `"Advanced pulsing light"`
    AdvancedPulsing,
}

impl StepKind {
    /// Every kind, in menu order.
    pub const ALL: [StepKind; 4] = [
        StepKind::Continuous,
        StepKind::Dark,
        StepKind::Pulsing,
        StepKind::AdvancedPulsing,
    ];

    /// Label stored in experiment files.
    pub fn label(self) -> &'static str {
        match self {
            StepKind::Continuous => "Continuous light",
            StepKind::Dark => "No light",
            StepKind::Pulsing => "Pulsing light",
            StepKind::AdvancedPulsing => "Advanced pulsing light",
        }
    }

    /// Inverse of [`StepKind::label`].
    pub fn from_label(label: &str) -> Result<Self, StepError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == label)
            .ok_or_else(|| StepError::UnknownKind(label.to_string()))
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One timed light instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Steady illumination.
    Continuous {
        /// How long the step lasts.
        duration: StepDuration,
        /// LED brightness.
        intensity: Intensity,
    },
    /// LEDs off.
    Dark {
        /// How long the step lasts.
        duration: StepDuration,
    },
    /// Square-wave pulsing at a fixed frequency.
    Pulsing {
        /// How long the step lasts.
        duration: StepDuration,
        /// Pulses per second.
        frequency_hz: NonZeroU32,
        /// LED brightness while on.
        intensity: Intensity,
    },
    /// Pulsing with explicit on/off times.
    AdvancedPulsing {
        /// How long the step lasts.
        duration: StepDuration,
        /// Milliseconds on per cycle.
        on_time_ms: NonZeroU32,
        /// Milliseconds off per cycle.
        off_time_ms: NonZeroU32,
        /// LED brightness while on.
        intensity: Intensity,
    },
}

impl Step {
    /// Steady light at `lux` (clamped).
    pub fn continuous(duration_secs: u32, lux: u32) -> Result<Self, StepError> {
        Ok(Step::Continuous {
            duration: StepDuration::from_secs(duration_secs)?,
            intensity: Intensity::new(lux),
        })
    }

    /// LEDs off.
    pub fn dark(duration_secs: u32) -> Result<Self, StepError> {
        Ok(Step::Dark {
            duration: StepDuration::from_secs(duration_secs)?,
        })
    }

    /// Pulsing at `frequency_hz`; zero frequency is rejected.
    pub fn pulsing(duration_secs: u32, frequency_hz: u32, lux: u32) -> Result<Self, StepError> {
        Ok(Step::Pulsing {
            duration: StepDuration::from_secs(duration_secs)?,
            frequency_hz: NonZeroU32::new(frequency_hz).ok_or(StepError::ZeroFrequency)?,
            intensity: Intensity::new(lux),
        })
    }

    /// Pulsing with explicit on/off times; zeros are rejected.
    pub fn advanced_pulsing(
        duration_secs: u32,
        on_time_ms: u32,
        off_time_ms: u32,
        lux: u32,
    ) -> Result<Self, StepError> {
        Ok(Step::AdvancedPulsing {
            duration: StepDuration::from_secs(duration_secs)?,
            on_time_ms: NonZeroU32::new(on_time_ms).ok_or(StepError::ZeroOnTime)?,
            off_time_ms: NonZeroU32::new(off_time_ms).ok_or(StepError::ZeroOffTime)?,
            intensity: Intensity::new(lux),
        })
    }

    /// Which variant this is.
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Continuous { .. } => StepKind::Continuous,
            Step::Dark { .. } => StepKind::Dark,
            Step::Pulsing { .. } => StepKind::Pulsing,
            Step::AdvancedPulsing { .. } => StepKind::AdvancedPulsing,
        }
    }

    /// Duration common to every variant.
    pub fn duration(&self) -> StepDuration {
        match *self {
            Step::Continuous { duration, .. }
            | Step::Dark { duration }
            | Step::Pulsing { duration, .. }
            | Step::AdvancedPulsing { duration, .. } => duration,
        }
    }

    /// `None` for dark steps.
    pub fn intensity(&self) -> Option<Intensity> {
        match *self {
            Step::Continuous { intensity, .. }
            | Step::Pulsing { intensity, .. }
            | Step::AdvancedPulsing { intensity, .. } => Some(intensity),
            Step::Dark { .. } => None,
        }
    }
}

/// One-line, human readable summary.
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {} seconds", self.kind(), self.duration())?;
        match self {
            Step::Continuous { intensity, .. } => write!(f, " at {} lux", intensity),
            Step::Dark { .. } => Ok(()),
            Step::Pulsing {
                frequency_hz,
                intensity,
                ..
            } => write!(
                f,
                " - Frequency: {} Hz, Intensity: {} lux",
                frequency_hz, intensity
            ),
            Step::AdvancedPulsing {
                on_time_ms,
                off_time_ms,
                intensity,
                ..
            } => write!(
                f,
                " - On: {} ms, Off: {} ms, Intensity: {} lux",
                on_time_ms, off_time_ms, intensity
            ),
        }
    }
}

/// Compact notation used on the command line:
///
/// ```text
/// on:<dur>:<lux>
/// off:<dur>
/// pulse:<dur>:<hz>:<lux>
/// adv:<dur>:<on_ms>:<off_ms>:<lux>
/// ```
///
/// `<dur>` is whole seconds (`90`) or an `h`/`m`/`s` composite (`1h30m`, `45s`).
impl FromStr for Step {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = || StepError::Syntax(s.to_string());
        let number = |field: &str| field.trim().parse::<u32>().map_err(|_| syntax());
        let fields: Vec<&str> = s.trim().split(':').collect();

        match fields[..] {
            [kind, dur, lux] if kind.eq_ignore_ascii_case("on") => {
                Step::continuous(parse_duration(dur)?, number(lux)?)
            }
            [kind, dur] if kind.eq_ignore_ascii_case("off") => Step::dark(parse_duration(dur)?),
            [kind, dur, hz, lux] if kind.eq_ignore_ascii_case("pulse") => {
                Step::pulsing(parse_duration(dur)?, number(hz)?, number(lux)?)
            }
            [kind, dur, on, off, lux] if kind.eq_ignore_ascii_case("adv") => {
                Step::advanced_pulsing(parse_duration(dur)?, number(on)?, number(off)?, number(lux)?)
            }
            [kind, ..]
                if !["on", "off", "pulse", "adv"]
                    .iter()
                    .any(|known| kind.eq_ignore_ascii_case(known)) =>
            {
                Err(StepError::UnknownKind(kind.to_string()))
            }
            _ => Err(syntax()),
        }
    }
}

/// Parses `90`, `45s`, `2m`, `1h30m15s` into whole seconds.
fn parse_duration(text: &str) -> Result<u32, StepError> {
    let text = text.trim();
    let syntax = || StepError::Syntax(text.to_string());
    if let Ok(secs) = text.parse::<u32>() {
        return Ok(secs);
    }

    let (mut hours, mut minutes, mut seconds) = (0u32, 0u32, 0u32);
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value = digits.parse::<u32>().map_err(|_| syntax())?;
        digits.clear();
        match ch.to_ascii_lowercase() {
            'h' => hours = value,
            'm' => minutes = value,
            's' => seconds = value,
            _ => return Err(syntax()),
        }
    }
    if !digits.is_empty() || text.is_empty() {
        return Err(syntax());
    }

    StepDuration::from_hms(hours, minutes, seconds).map(StepDuration::as_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_rejected() {
        assert_eq!(Step::dark(0), Err(StepError::ZeroDuration));
        assert_eq!(StepDuration::from_hms(0, 0, 0), Err(StepError::ZeroDuration));
    }

    #[test]
    fn test_hms_duration() {
        let duration = StepDuration::from_hms(1, 2, 3).unwrap();
        assert_eq!(duration.as_secs(), 3723);
        assert_eq!(duration.as_duration(), Duration::from_secs(3723));
        assert_eq!(
            StepDuration::from_hms(u32::MAX, 0, 0),
            Err(StepError::DurationOverflow)
        );
    }

    #[test]
    fn test_intensity_is_clamped() {
        assert_eq!(Intensity::new(250).lux(), 100);
        assert_eq!(Intensity::new(42).lux(), 42);
        let step = Step::continuous(5, 1000).unwrap();
        assert_eq!(step.intensity(), Some(Intensity::new(100)));
    }

    #[test]
    fn test_zero_pulse_parameters_rejected() {
        assert_eq!(Step::pulsing(5, 0, 50), Err(StepError::ZeroFrequency));
        assert_eq!(
            Step::advanced_pulsing(5, 0, 10, 50),
            Err(StepError::ZeroOnTime)
        );
        assert_eq!(
            Step::advanced_pulsing(5, 10, 0, 50),
            Err(StepError::ZeroOffTime)
        );
    }

    #[test]
    fn test_summaries() {
        assert_eq!(
            Step::continuous(10, 50).unwrap().to_string(),
            "Continuous light for 10 seconds at 50 lux"
        );
        assert_eq!(Step::dark(3).unwrap().to_string(), "No light for 3 seconds");
        assert_eq!(
            Step::pulsing(20, 5, 80).unwrap().to_string(),
            "Pulsing light for 20 seconds - Frequency: 5 Hz, Intensity: 80 lux"
        );
        assert_eq!(
            Step::advanced_pulsing(30, 100, 250, 60).unwrap().to_string(),
            "Advanced pulsing light for 30 seconds - On: 100 ms, Off: 250 ms, Intensity: 60 lux"
        );
    }

    #[test]
    fn test_kind_labels() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::from_label(kind.label()), Ok(kind));
        }
        assert!(matches!(
            StepKind::from_label("Strobe"),
            Err(StepError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_parse_compact_notation() {
        assert_eq!("on:10:50".parse::<Step>(), Step::continuous(10, 50));
        assert_eq!("off:1m".parse::<Step>(), Step::dark(60));
        assert_eq!("PULSE:1h30m:5:70".parse::<Step>(), Step::pulsing(5400, 5, 70));
        assert_eq!(
            "adv:45s:100:200:30".parse::<Step>(),
            Step::advanced_pulsing(45, 100, 200, 30)
        );
    }

    #[test]
    fn test_parse_compact_notation_errors() {
        assert_eq!("off:0".parse::<Step>(), Err(StepError::ZeroDuration));
        assert_eq!("off:0m".parse::<Step>(), Err(StepError::ZeroDuration));
        assert!(matches!("on:10".parse::<Step>(), Err(StepError::Syntax(_))));
        assert!(matches!("on:1x:5".parse::<Step>(), Err(StepError::Syntax(_))));
        assert!(matches!(
            "strobe:10".parse::<Step>(),
            Err(StepError::UnknownKind(_))
        ));
    }
}
