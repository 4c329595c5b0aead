//! Experiment execution engine.
//!
//! The [`Engine`] owns the queue, the run state, the telemetry sampler and the
//! device transport. [`Engine::spawn`] moves it into a single Tokio task that
//! serialises two kinds of work:
//!
//! - commands from [`EngineHandle`]s (queue edits, run, stop, queries), and
//! - timer expirations from its [`TimerQueue`] (step completion, advance to the
//!   next step, elapsed-time ticks, telemetry polls).
//!
//! Nothing blocks the task for the length of a step; waiting is always a timer.
//! Commands are preferred over timers when both are ready, and stopping a run
//! revokes every pending step timer before the reply is sent, so no step of a
//! cancelled run can advance afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use illumicell::adapters::MockTransport;
//! use illumicell::config::Settings;
//! use illumicell::engine::Engine;
//! use illumicell::experiment::Step;
//!
//! # async fn example() -> illumicell::error::EngineResult<()> {
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let (handle, _task) = Engine::new(Settings::default(), MockTransport::new(), events).spawn();
//!
//! handle.append(Step::continuous(2, 50)?).await?;
//! handle.append(Step::dark(1)?).await?;
//! handle.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod observer;
pub mod state;
pub mod telemetry;
pub mod timers;

pub use observer::{EngineEvent, EngineObserver, StepProgress};
pub use state::{Elapsed, EngineStatus, Phase, RunState, RunSummary};
pub use telemetry::{Sample, SampleSeries, TelemetrySampler};
pub use timers::{TimerHandle, TimerQueue};

use crate::adapters::{DeviceTransport, TransportError};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::experiment::{file, Queue, Step};
use crate::messages::EngineCommand;
use crate::protocol::Command;
use chrono::Local;
use std::ops::ControlFlow;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mailbox depth for engine commands.
const COMMAND_CAPACITY: usize = 32;

/// Work scheduled on the engine's timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTask {
    /// Mark step `index` completed.
    MarkCompleted(usize),
    /// Play step `index` (or finish the run when past the end).
    Advance(usize),
    /// Report elapsed time; the payload is the tick number since run start.
    ElapsedTick(u32),
    /// Read one telemetry line.
    TelemetryPoll,
}

/// The experiment engine: queue, scheduler, sampler and device in one task.
///
/// Build it with [`Engine::new`] and start it with [`Engine::spawn`]; all further
/// interaction goes through the returned [`EngineHandle`].
pub struct Engine {
    settings: Settings,
    queue: Queue,
    run: RunState,
    timers: TimerQueue<TimerTask>,
    sampler: TelemetrySampler,
    transport: Box<dyn DeviceTransport>,
    observer: Box<dyn EngineObserver>,
}

impl Engine {
    /// Create an idle engine with an empty queue.
    ///
    /// The transport is not touched until the first run; a transport that failed
    /// to open surfaces as a device fault at that point.
    pub fn new<T, O>(settings: Settings, transport: T, observer: O) -> Self
    where
        T: DeviceTransport + 'static,
        O: EngineObserver + 'static,
    {
        let sampler = TelemetrySampler::new(settings.telemetry.poll_interval());
        Self {
            settings,
            queue: Queue::new(),
            run: RunState::default(),
            timers: TimerQueue::new(),
            sampler,
            transport: Box::new(transport),
            observer: Box::new(observer),
        }
    }

    /// Start the engine task.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run_loop(rx));
        (EngineHandle { tx }, task)
    }

    async fn run_loop(mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        info!(transport = self.transport.name(), "Experiment engine started");

        loop {
            let next_deadline = self.timers.next_deadline();
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        info!("All engine handles dropped");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }

                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                    self.fire_due_timers().await;
                }
            }
        }

        info!("Experiment engine stopped");
    }

    /// Dispatch one mailbox command. `Break` ends the engine task.
    async fn handle_command(&mut self, command: EngineCommand) -> ControlFlow<()> {
        match command {
            EngineCommand::Append { step, response } => {
                self.queue.append(step);
                self.observer.notify_queue_changed();
                let _ = response.send(self.queue.len());
            }
            EngineCommand::Extend { steps, response } => {
                self.extend(steps);
                let _ = response.send(self.queue.len());
            }
            EngineCommand::RemoveAt { index, response } => {
                let _ = response.send(self.remove_at(index));
            }
            EngineCommand::Clear { response } => {
                let _ = response.send(self.clear());
            }
            EngineCommand::Load { path, response } => {
                let _ = response.send(self.load(&path).await);
            }
            EngineCommand::Save { path, response } => {
                let _ = response.send(self.save(&path).await);
            }
            EngineCommand::Steps { response } => {
                let _ = response.send(self.queue.as_slice().to_vec());
            }
            EngineCommand::Summary { response } => {
                let _ = response.send(self.queue.summary_lines());
            }
            EngineCommand::Run { response } => {
                let _ = response.send(self.start_run().await);
            }
            EngineCommand::Stop { response } => {
                let _ = response.send(self.stop_run().await);
            }
            EngineCommand::Status { response } => {
                let _ = response.send(self.status());
            }
            EngineCommand::OpenSensorView { response } => {
                let _ = response.send(self.open_sensor_view());
            }
            EngineCommand::CloseSensorView { response } => {
                self.sampler.stop(&mut self.timers);
                let _ = response.send(());
            }
            EngineCommand::SamplesSince { cursor, response } => {
                let _ = response.send(self.sampler.series().since(cursor).to_vec());
            }
            EngineCommand::Shutdown { response } => {
                info!("Shutdown command received");
                self.shutdown().await;
                let _ = response.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ---------------------------------------------------------------------
    // Queue
    // ---------------------------------------------------------------------

    fn extend(&mut self, steps: Vec<Step>) {
        self.queue.extend(steps);
        self.observer.notify_queue_changed();
    }

    fn remove_at(&mut self, index: usize) -> EngineResult<Step> {
        if self.run.phase != Phase::Idle {
            return Err(EngineError::InvalidWhileRunning);
        }
        let step = self.queue.remove_at(index)?;
        self.observer.notify_queue_changed();
        Ok(step)
    }

    fn clear(&mut self) -> EngineResult<()> {
        if self.run.phase != Phase::Idle {
            return Err(EngineError::InvalidWhileRunning);
        }
        self.queue.clear();
        self.observer.notify_queue_changed();
        Ok(())
    }

    async fn load(&mut self, path: &Path) -> EngineResult<usize> {
        let steps = file::decode(&tokio::fs::read(path).await?)?;
        let count = steps.len();
        self.extend(steps);
        info!(path = %path.display(), steps = count, "Experiment loaded");
        Ok(count)
    }

    // Takes `&mut self`: a shared borrow held across the write would need
    // `Engine: Sync`, which the boxed transport and observer are not.
    async fn save(&mut self, path: &Path) -> EngineResult<()> {
        if self.queue.is_empty() {
            return Err(EngineError::EmptyQueue);
        }
        let bytes = file::encode(self.queue.as_slice())?;
        tokio::fs::write(path, bytes).await?;
        info!(path = %path.display(), steps = self.queue.len(), "Experiment saved");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Scheduler
    // ---------------------------------------------------------------------

    async fn start_run(&mut self) -> EngineResult<RunSummary> {
        if self.run.phase != Phase::Idle {
            return Err(EngineError::InvalidWhileRunning);
        }
        if self.queue.is_empty() {
            return Err(EngineError::EmptyQueue);
        }

        self.run = RunState::started(self.queue.as_slice().to_vec(), Instant::now());
        let summary = RunSummary {
            run_id: self.run.run_id.unwrap_or_else(Uuid::nil),
            started_at: Local::now(),
            steps: self.run.plan.len(),
            total_duration: self.queue.total_duration(),
        };
        info!(
            run_id = %summary.run_id,
            steps = summary.steps,
            total_secs = summary.total_duration.as_secs(),
            "Experiment started"
        );

        self.observer.notify_elapsed(Elapsed::ZERO);
        self.arm_elapsed_tick(1);
        if self.settings.telemetry.auto_start {
            self.sampler.start(&mut self.timers);
        } else {
            self.sampler.reset(&mut self.timers);
        }

        self.play(0).await?;
        Ok(summary)
    }

    /// Transmit step `index` and arm its completion and advance timers, or
    /// finish the run when `index` is past the last step.
    async fn play(&mut self, index: usize) -> EngineResult<()> {
        let Some(step) = self.run.plan.get(index).copied() else {
            return self.finish_run().await;
        };

        self.run.current_index = Some(index);
        self.observer
            .notify_step_progress(index, StepProgress::InProgress);

        if let Err(e) = self.transmit(Command::Step(&step)).await {
            return Err(self.fault(e).await);
        }
        debug!(index, "Step transmitted");

        // Same deadline for both; the completion marker is scheduled first so it
        // fires before the next step is marked in progress.
        let deadline = Instant::now() + step.duration().as_duration();
        let completed = self
            .timers
            .schedule_at(deadline, TimerTask::MarkCompleted(index));
        let advance = self.timers.schedule_at(deadline, TimerTask::Advance(index + 1));
        self.run.pending_timers.extend([completed, advance]);
        Ok(())
    }

    async fn transmit(&mut self, command: Command<'_>) -> Result<(), TransportError> {
        let frame = command.to_string();
        self.transport.send(&frame).await?;
        debug!(frame = frame.trim_end(), "Frame sent");
        Ok(())
    }

    async fn finish_run(&mut self) -> EngineResult<()> {
        if let Err(e) = self.transmit(Command::AllOff).await {
            return Err(self.fault(e).await);
        }
        info!(
            run_id = ?self.run.run_id,
            elapsed = %self.run.elapsed().unwrap_or_default(),
            "Experiment completed"
        );
        self.teardown();
        self.observer.notify_run_finished();
        Ok(())
    }

    /// Cancel the active run. Returns `Ok(false)` when nothing was running.
    async fn stop_run(&mut self) -> EngineResult<bool> {
        if self.run.phase == Phase::Idle {
            return Ok(false);
        }
        self.run.phase = Phase::Stopping;
        self.revoke_pending_timers();

        let sent = self.transmit(Command::AllOff).await;
        info!(
            run_id = ?self.run.run_id,
            index = ?self.run.current_index,
            "Experiment stopped"
        );
        self.teardown();

        match sent {
            Ok(()) => Ok(true),
            Err(e) => {
                error!("Failed to switch the light off after stop: {}", e);
                Err(EngineError::DeviceFault(e))
            }
        }
    }

    /// Abort the run after a failed transmission.
    async fn fault(&mut self, cause: TransportError) -> EngineError {
        error!(
            run_id = ?self.run.run_id,
            index = ?self.run.current_index,
            "Device fault during run: {}",
            cause
        );
        self.run.phase = Phase::Stopping;
        self.revoke_pending_timers();

        if let Err(e) = self.transmit(Command::AllOff).await {
            debug!("All-off after fault also failed: {}", e);
        }
        self.teardown();
        self.observer.notify_run_faulted(&cause.to_string());
        EngineError::DeviceFault(cause)
    }

    fn revoke_pending_timers(&mut self) {
        for handle in self.run.pending_timers.drain() {
            self.timers.cancel(handle);
        }
    }

    /// Return to `Idle`, clear every progress marker and stop sampling.
    ///
    /// The series of the ended run stays readable until the next run starts.
    fn teardown(&mut self) {
        self.revoke_pending_timers();
        self.sampler.stop(&mut self.timers);
        for index in 0..self.run.plan.len() {
            self.observer
                .notify_step_progress(index, StepProgress::NotStarted);
        }
        self.run = RunState::default();
    }

    fn arm_elapsed_tick(&mut self, tick: u32) {
        let Some(start) = self.run.start_time else {
            return;
        };
        let deadline = start + self.settings.scheduler.elapsed_tick() * tick;
        let handle = self.timers.schedule_at(deadline, TimerTask::ElapsedTick(tick));
        self.run.pending_timers.insert(handle);
    }

    async fn fire_due_timers(&mut self) {
        while let Some((handle, task)) = self.timers.pop_due(Instant::now()) {
            self.run.pending_timers.remove(&handle);
            match task {
                TimerTask::MarkCompleted(index) => {
                    self.observer
                        .notify_step_progress(index, StepProgress::Completed);
                }
                TimerTask::Advance(index) => {
                    // A fault has already been reported to the observer.
                    if let Err(e) = self.play(index).await {
                        warn!("Run aborted at step {}: {}", index, e);
                    }
                }
                TimerTask::ElapsedTick(tick) => {
                    if self.run.is_running() {
                        if let Some(elapsed) = self.run.elapsed() {
                            self.observer.notify_elapsed(elapsed);
                        }
                        self.arm_elapsed_tick(tick.saturating_add(1));
                    }
                }
                TimerTask::TelemetryPoll => {
                    let running = self.run.is_running();
                    if let Some(sample) = self
                        .sampler
                        .poll(handle, self.transport.as_mut(), running, &mut self.timers)
                        .await
                    {
                        self.observer.notify_sample_appended(sample);
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Telemetry & status
    // ---------------------------------------------------------------------

    fn open_sensor_view(&mut self) -> EngineResult<()> {
        if !self.run.is_running() {
            return Err(EngineError::NotRunning);
        }
        self.sampler.start(&mut self.timers);
        Ok(())
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.run.phase,
            current_index: self.run.current_index,
            queue_len: self.queue.len(),
            total_duration: self.queue.total_duration(),
            elapsed: self.run.elapsed(),
            run_id: self.run.run_id,
            latest_sample: self.sampler.series().latest(),
        }
    }

    async fn shutdown(&mut self) {
        if self.run.phase != Phase::Idle {
            if let Err(e) = self.stop_run().await {
                warn!("Shutdown during run: {}", e);
            }
        }
        self.sampler.stop(&mut self.timers);
    }
}

/// Cloneable handle used to drive a spawned [`Engine`].
///
/// Every method returns [`EngineError::EngineClosed`] once the engine task has
/// exited.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> EngineResult<T> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(command(response))
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        rx.await.map_err(|_| EngineError::EngineClosed)
    }

    /// Append a step; returns the new queue length.
    pub async fn append(&self, step: Step) -> EngineResult<usize> {
        self.request(|response| EngineCommand::Append { step, response })
            .await
    }

    /// Append steps in order; returns the new queue length.
    pub async fn extend(&self, steps: Vec<Step>) -> EngineResult<usize> {
        self.request(|response| EngineCommand::Extend { steps, response })
            .await
    }

    /// Remove and return the step at `index`. Rejected while a run is active.
    pub async fn remove_at(&self, index: usize) -> EngineResult<Step> {
        self.request(|response| EngineCommand::RemoveAt { index, response })
            .await?
    }

    /// Empty the queue. Rejected while a run is active.
    pub async fn clear(&self) -> EngineResult<()> {
        self.request(|response| EngineCommand::Clear { response })
            .await?
    }

    /// Append the steps of an experiment file; returns how many were loaded.
    pub async fn load(&self, path: impl AsRef<Path>) -> EngineResult<usize> {
        let path = path.as_ref().to_path_buf();
        self.request(|response| EngineCommand::Load { path, response })
            .await?
    }

    /// Write the queue to an experiment file.
    pub async fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref().to_path_buf();
        self.request(|response| EngineCommand::Save { path, response })
            .await?
    }

    /// Copy of the queue.
    pub async fn steps(&self) -> EngineResult<Vec<Step>> {
        self.request(|response| EngineCommand::Steps { response })
            .await
    }

    /// Numbered one-line summaries, or the empty-queue hint.
    pub async fn summary(&self) -> EngineResult<Vec<String>> {
        self.request(|response| EngineCommand::Summary { response })
            .await
    }

    /// Start playing the queue from the first step.
    pub async fn run(&self) -> EngineResult<RunSummary> {
        self.request(|response| EngineCommand::Run { response })
            .await?
    }

    /// Cancel the active run; `Ok(false)` if nothing was running.
    ///
    /// Confirmation is the caller's business; once this is called the run is
    /// cancelled unconditionally.
    pub async fn stop(&self) -> EngineResult<bool> {
        self.request(|response| EngineCommand::Stop { response })
            .await?
    }

    /// Phase, position, elapsed time and the latest sample.
    pub async fn status(&self) -> EngineResult<EngineStatus> {
        self.request(|response| EngineCommand::Status { response })
            .await
    }

    /// Restart sampling for the active run with an empty series.
    ///
    /// Fails with [`EngineError::NotRunning`] when idle.
    pub async fn open_sensor_view(&self) -> EngineResult<()> {
        self.request(|response| EngineCommand::OpenSensorView { response })
            .await?
    }

    /// Stop sampling; the series collected so far stays readable.
    pub async fn close_sensor_view(&self) -> EngineResult<()> {
        self.request(|response| EngineCommand::CloseSensorView { response })
            .await
    }

    /// Samples of the current (or last) run with `sequence_index >= cursor`.
    pub async fn samples_since(&self, cursor: u64) -> EngineResult<Vec<Sample>> {
        self.request(|response| EngineCommand::SamplesSince { cursor, response })
            .await
    }

    /// Stop any run, switch the light off and end the engine task.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.request(|response| EngineCommand::Shutdown { response })
            .await
    }
}
