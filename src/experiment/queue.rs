//! Ordered collection of steps that defines one experiment.
//!
//! Insertion order is playback order. The queue itself knows nothing about runs;
//! the engine refuses destructive edits while a run is active.

use super::step::Step;
use crate::error::{EngineError, EngineResult};
use std::time::Duration;

/// Placeholder line shown for an empty queue.
pub const EMPTY_QUEUE_HINT: &str =
    "Add a step to the experiment queue or open a previously saved file.";

/// Ordered list of steps making up an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    steps: Vec<Step>,
}

impl Queue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `step` at the end.
    pub fn append(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Removes and returns the step at `index`.
    pub fn remove_at(&mut self, index: usize) -> EngineResult<Step> {
        if index >= self.steps.len() {
            return Err(EngineError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(self.steps.remove(index))
    }

    /// Appends `steps` in order. Loading merges into the existing queue.
    pub fn extend<I>(&mut self, steps: I)
    where
        I: IntoIterator<Item = Step>,
    {
        self.steps.extend(steps);
    }

    /// Removes every step.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` when there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Steps in run order.
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// Steps as a slice.
    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }

    /// Sum of all step durations.
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.duration().as_duration()).sum()
    }

    /// Numbered one-line summaries, or the empty-queue hint.
    pub fn summary_lines(&self) -> Vec<String> {
        if self.steps.is_empty() {
            return vec![EMPTY_QUEUE_HINT.to_string()];
        }
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| format!("{}: {}", idx + 1, step))
            .collect()
    }
}

impl From<Vec<Step>> for Queue {
    fn from(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

impl<'a> IntoIterator for &'a Queue {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
