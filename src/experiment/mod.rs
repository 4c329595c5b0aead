//! Experiment definition: steps, the queue that orders them, and the file format
//! used to save and reopen experiments.
//!
//! # Example
//!
//! ```rust
//! use illumicell::experiment::{Queue, Step};
//!
//! let mut queue = Queue::new();
//! queue.append(Step::continuous(2, 50).unwrap());
//! queue.append(Step::dark(1).unwrap());
//!
//! assert_eq!(queue.total_duration().as_secs(), 3);
//! assert_eq!(queue.summary_lines()[1], "2: No light for 1 seconds");
//! ```

pub mod file;
pub mod queue;
pub mod step;

pub use queue::{Queue, EMPTY_QUEUE_HINT};
pub use step::{Intensity, Step, StepDuration, StepError, StepKind};
