//! Sensor telemetry sampling.
//!
//! While a run is active the sampler polls the device on a fixed cadence. Each
//! poll reads at most one line; lines that are not plain decimal numbers are
//! logged and dropped. Accepted readings are appended to a per-run series that
//! consumers read incrementally with [`SampleSeries::since`].
//!
//! The engine stops the sampler when a run ends. A poll that still fires for a
//! handle the sampler no longer owns, or outside `Running`, never reads from the
//! device.

use super::timers::{TimerHandle, TimerQueue};
use super::TimerTask;
use crate::adapters::DeviceTransport;
use crate::protocol::parse_reading;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// One accepted sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Position in the current run's series, from 0.
    pub sequence_index: u64,
    /// Sensor value as reported by the device.
    pub value: f64,
}

/// Append-only series of samples for one run.
#[derive(Debug, Default, Clone)]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

impl SampleSeries {
    /// Append a reading and return it with its index.
    pub fn push(&mut self, value: f64) -> Sample {
        let sample = Sample {
            sequence_index: self.samples.len() as u64,
            value,
        };
        self.samples.push(sample);
        sample
    }

    /// Samples with `sequence_index >= cursor`.
    pub fn since(&self, cursor: u64) -> &[Sample] {
        let start = usize::try_from(cursor)
            .unwrap_or(usize::MAX)
            .min(self.samples.len());
        &self.samples[start..]
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.last().copied()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` before the first accepted reading.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples; indices restart at 0.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Periodic telemetry poller owned by the engine.
#[derive(Debug)]
pub struct TelemetrySampler {
    interval: Duration,
    series: SampleSeries,
    poll_timer: Option<TimerHandle>,
}

impl TelemetrySampler {
    /// An inactive sampler polling every `interval` once started.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            series: SampleSeries::default(),
            poll_timer: None,
        }
    }

    /// Whether a poll is scheduled.
    pub fn is_active(&self) -> bool {
        self.poll_timer.is_some()
    }

    /// Samples collected since the last start or reset.
    pub fn series(&self) -> &SampleSeries {
        &self.series
    }

    /// Begin polling now, discarding samples from any earlier run.
    pub(crate) fn start(&mut self, timers: &mut TimerQueue<TimerTask>) {
        self.stop(timers);
        self.series.clear();
        self.poll_timer = Some(timers.schedule_after(Duration::ZERO, TimerTask::TelemetryPoll));
        debug!("Telemetry sampler started");
    }

    /// Stop polling and discard the collected series.
    pub(crate) fn reset(&mut self, timers: &mut TimerQueue<TimerTask>) {
        self.stop(timers);
        self.series.clear();
    }

    pub(crate) fn stop(&mut self, timers: &mut TimerQueue<TimerTask>) {
        if let Some(handle) = self.poll_timer.take() {
            timers.cancel(handle);
            debug!("Telemetry sampler stopped");
        }
    }

    /// Handle the poll timer `fired`. Returns the sample accepted on this tick,
    /// if any.
    pub(crate) async fn poll(
        &mut self,
        fired: TimerHandle,
        transport: &mut dyn DeviceTransport,
        running: bool,
        timers: &mut TimerQueue<TimerTask>,
    ) -> Option<Sample> {
        if self.poll_timer != Some(fired) {
            debug!("Ignoring stale telemetry poll");
            return None;
        }
        self.poll_timer = None;
        if !running {
            debug!("Run no longer active; telemetry sampler finished");
            return None;
        }

        let sample = self.read_one(transport).await;
        self.poll_timer = Some(timers.schedule_after(self.interval, TimerTask::TelemetryPoll));
        sample
    }

    async fn read_one(&mut self, transport: &mut dyn DeviceTransport) -> Option<Sample> {
        match transport.bytes_to_read().await {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                warn!("Telemetry poll failed: {}", e);
                return None;
            }
        }

        let line = match transport.read_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Error reading telemetry: {}", e);
                return None;
            }
        };

        match parse_reading(&line) {
            Ok(value) => {
                let sample = self.series.push(value);
                debug!(
                    index = sample.sequence_index,
                    value = sample.value,
                    "Telemetry sample accepted"
                );
                Some(sample)
            }
            Err(e) => {
                warn!("Discarding telemetry: {}", e);
                None
            }
        }
    }
}
