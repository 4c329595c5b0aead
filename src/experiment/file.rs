//! Experiment file format.
//!
//! An experiment is stored as a JSON array of records. Every record is itself
//! an array that starts with `[step_type, duration_seconds]` followed by the
//! variant fields in a fixed order:
//!
//! ```json
//! [
//!     ["Continuous light", 10, 50],
//!     ["Pulsing light", 30, 5, 80],
//!     ["Advanced pulsing light", 60, 100, 250, 40],
//!     ["No light", 5]
//! ]
//! ```
//!
//! Records are validated through the same constructors as interactive input,
//! so a zero duration or zero pulse parameter is a parse error and an
//! out-of-range intensity is clamped.

use super::step::{Step, StepKind};
use crate::error::{EngineError, EngineResult};
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;
use std::path::Path;

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = match self.kind() {
            StepKind::Dark => 2,
            StepKind::Continuous => 3,
            StepKind::Pulsing => 4,
            StepKind::AdvancedPulsing => 5,
        };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(self.kind().label())?;
        seq.serialize_element(&self.duration().as_secs())?;
        match *self {
            Step::Continuous { intensity, .. } => {
                seq.serialize_element(&intensity.lux())?;
            }
            Step::Dark { .. } => {}
            Step::Pulsing {
                frequency_hz,
                intensity,
                ..
            } => {
                seq.serialize_element(&frequency_hz.get())?;
                seq.serialize_element(&intensity.lux())?;
            }
            Step::AdvancedPulsing {
                on_time_ms,
                off_time_ms,
                intensity,
                ..
            } => {
                seq.serialize_element(&on_time_ms.get())?;
                seq.serialize_element(&off_time_ms.get())?;
                seq.serialize_element(&intensity.lux())?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(StepRecordVisitor)
    }
}

struct StepRecordVisitor;

impl<'de> Visitor<'de> for StepRecordVisitor {
    type Value = Step;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a step record [step_type, duration_seconds, ...]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Step, A::Error> {
        let label: String = field(&mut seq, 0)?;
        let kind = StepKind::from_label(&label).map_err(de::Error::custom)?;
        let duration: u32 = field(&mut seq, 1)?;

        let step = match kind {
            StepKind::Continuous => Step::continuous(duration, field(&mut seq, 2)?),
            StepKind::Dark => Step::dark(duration),
            StepKind::Pulsing => {
                let frequency_hz = field(&mut seq, 2)?;
                Step::pulsing(duration, frequency_hz, field(&mut seq, 3)?)
            }
            StepKind::AdvancedPulsing => {
                let on_time_ms = field(&mut seq, 2)?;
                let off_time_ms = field(&mut seq, 3)?;
                Step::advanced_pulsing(duration, on_time_ms, off_time_ms, field(&mut seq, 4)?)
            }
        }
        .map_err(de::Error::custom)?;

        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::custom(format!(
                "too many fields in '{}' record",
                label
            )));
        }
        Ok(step)
    }
}

fn field<'de, A, T>(seq: &mut A, index: usize) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, &"a complete step record"))
}

/// Serialize steps as pretty JSON with four-space indentation.
pub fn encode(steps: &[Step]) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    steps.serialize(&mut serializer)?;
    Ok(out)
}

/// Parse a whole experiment file; nothing is returned unless every record is valid.
pub fn decode(bytes: &[u8]) -> EngineResult<Vec<Step>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write `steps` to `path`. An empty experiment is not saved.
pub fn save<P: AsRef<Path>>(path: P, steps: &[Step]) -> EngineResult<()> {
    if steps.is_empty() {
        return Err(EngineError::EmptyQueue);
    }
    std::fs::write(path, encode(steps)?)?;
    Ok(())
}

/// Read the steps stored at `path`, in file order.
pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Vec<Step>> {
    decode(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let steps = vec![
            Step::continuous(10, 50).unwrap(),
            Step::dark(5).unwrap(),
            Step::pulsing(30, 5, 80).unwrap(),
            Step::advanced_pulsing(60, 100, 250, 40).unwrap(),
        ];
        let value: serde_json::Value = serde_json::from_slice(&encode(&steps).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                ["Continuous light", 10, 50],
                ["No light", 5],
                ["Pulsing light", 30, 5, 80],
                ["Advanced pulsing light", 60, 100, 250, 40]
            ])
        );
    }

    #[test]
    fn test_four_space_indent() {
        let text = String::from_utf8(encode(&[Step::dark(5).unwrap()]).unwrap()).unwrap();
        assert!(text.starts_with("[\n    [\n        \"No light\""));
    }

    #[test]
    fn test_decode_clamps_intensity() {
        let steps = decode(br#"[["Continuous light", 10, 400]]"#).unwrap();
        assert_eq!(steps, vec![Step::continuous(10, 100).unwrap()]);
    }

    #[test]
    fn test_decode_rejects_invalid_records() {
        for bad in [
            r#"[["No light", 0]]"#,
            r#"[["Strobe light", 10]]"#,
            r#"[["Pulsing light", 10, 5]]"#,
            r#"[["Pulsing light", 10, 0, 50]]"#,
            r#"[["No light", 10, 50]]"#,
            r#"{"steps": []}"#,
        ] {
            let err = decode(bad.as_bytes()).unwrap_err();
            assert!(
                matches!(err, EngineError::ExperimentFile(_)),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_save_rejects_empty_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let err = save(dir.path().join("empty.json"), &[]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyQueue));
        assert!(!dir.path().join("empty.json").exists());
    }
}
