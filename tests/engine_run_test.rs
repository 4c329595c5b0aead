//! Integration tests for the experiment engine against the mock transport
//!
//! All tests run on a paused Tokio clock, so step durations elapse instantly
//! while transmission instants stay exact.

use illumicell::adapters::MockTransport;
use illumicell::config::Settings;
use illumicell::engine::{
    Elapsed, Engine, EngineEvent, EngineHandle, Phase, Sample, StepProgress,
};
use illumicell::error::EngineError;
use illumicell::experiment::Step;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

fn quiet_settings() -> Settings {
    let mut settings = Settings::default();
    settings.telemetry.auto_start = false;
    settings
}

fn start(
    settings: Settings,
    device: &MockTransport,
) -> (EngineHandle, UnboundedReceiver<EngineEvent>) {
    let (events_tx, events) = tokio::sync::mpsc::unbounded_channel();
    let (handle, _task) = Engine::new(settings, device.clone(), events_tx).spawn();
    (handle, events)
}

/// Collect events up to and including the first finished or faulted event.
async fn events_until_end(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let end = matches!(event, EngineEvent::RunFinished | EngineEvent::RunFaulted(_));
        seen.push(event);
        if end {
            break;
        }
    }
    seen
}

fn progress(events: &[EngineEvent]) -> Vec<(usize, StepProgress)> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::StepProgress { index, state } => Some((*index, *state)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_two_step_run_timing() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(2, 50).unwrap()).await.unwrap();
    engine.append(Step::dark(1).unwrap()).await.unwrap();

    let t0 = Instant::now();
    let summary = engine.run().await.unwrap();
    assert_eq!(summary.steps, 2);
    assert_eq!(summary.total_duration, Duration::from_secs(3));

    let seen = events_until_end(&mut events).await;
    assert_eq!(seen.last(), Some(&EngineEvent::RunFinished));

    let sent = device.transmissions();
    let frames: Vec<&str> = sent.iter().map(|t| t.frame.as_str()).collect();
    assert_eq!(frames, vec!["ON 2 50\n", "OFF 1\n", "OFF\n"]);

    let offsets: Vec<u64> = sent
        .iter()
        .map(|t| t.at.duration_since(t0).as_secs())
        .collect();
    assert_eq!(offsets, vec![0, 2, 3]);

    assert_eq!(engine.status().await.unwrap().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_progress_markers_and_elapsed() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(2, 50).unwrap()).await.unwrap();
    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    let seen = events_until_end(&mut events).await;

    assert_eq!(
        progress(&seen),
        vec![
            (0, StepProgress::InProgress),
            (0, StepProgress::Completed),
            (1, StepProgress::InProgress),
            (1, StepProgress::Completed),
            (0, StepProgress::NotStarted),
            (1, StepProgress::NotStarted),
        ]
    );

    let elapsed: Vec<String> = seen
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Elapsed(e) => Some(e.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(elapsed, vec!["00:00:00", "00:00:01", "00:00:02"]);
    assert_eq!(
        seen.iter()
            .find(|e| matches!(e, EngineEvent::Elapsed(_))),
        Some(&EngineEvent::Elapsed(Elapsed::ZERO))
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_queue_run_is_rejected() {
    let device = MockTransport::new();
    let (engine, _events) = start(quiet_settings(), &device);

    let result = engine.run().await;
    assert!(matches!(result, Err(EngineError::EmptyQueue)));
    assert!(device.frames().is_empty());
    assert_eq!(engine.status().await.unwrap().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_run_while_running_is_rejected() {
    let device = MockTransport::new();
    let (engine, _events) = start(quiet_settings(), &device);

    engine.append(Step::dark(5).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    assert!(matches!(
        engine.run().await,
        Err(EngineError::InvalidWhileRunning)
    ));
    assert_eq!(device.frames(), vec!["OFF 5\n"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_run_sends_one_off() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(2, 50).unwrap()).await.unwrap();
    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(engine.stop().await.unwrap());
    assert_eq!(device.frames(), vec!["ON 2 50\n", "OFF\n"]);

    // Nothing from the cancelled run may fire afterwards.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(device.frames(), vec!["ON 2 50\n", "OFF\n"]);

    let status = engine.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.current_index.is_none());
    assert!(!engine.stop().await.unwrap());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(!seen.contains(&EngineEvent::RunFinished));
    assert!(progress(&seen).ends_with(&[
        (0, StepProgress::NotStarted),
        (1, StepProgress::NotStarted)
    ]));
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_device_faults_at_start() {
    let device = MockTransport::disconnected();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(2, 50).unwrap()).await.unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(err.is_device_fault());

    let seen = events_until_end(&mut events).await;
    assert!(matches!(seen.last(), Some(EngineEvent::RunFaulted(_))));
    assert!(device.frames().is_empty());
    assert_eq!(engine.status().await.unwrap().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_fault_mid_run_turns_light_off() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(2, 50).unwrap()).await.unwrap();
    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.append(Step::pulsing(4, 5, 80).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    // The second step's frame fails; the all-off that follows goes through.
    device.fail_next_sends(1);
    let seen = events_until_end(&mut events).await;

    assert!(matches!(seen.last(), Some(EngineEvent::RunFaulted(_))));
    assert_eq!(device.frames(), vec!["ON 2 50\n", "OFF\n"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(device.frames().len(), 2);
    assert_eq!(engine.status().await.unwrap().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_queue_edits_while_running() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::dark(2).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    assert!(matches!(
        engine.remove_at(0).await,
        Err(EngineError::InvalidWhileRunning)
    ));
    assert!(matches!(
        engine.clear().await,
        Err(EngineError::InvalidWhileRunning)
    ));

    // Appending is allowed but does not extend the run in progress.
    assert_eq!(engine.append(Step::continuous(1, 10).unwrap()).await.unwrap(), 2);

    events_until_end(&mut events).await;
    assert_eq!(device.frames(), vec!["OFF 2\n", "OFF\n"]);

    assert_eq!(engine.remove_at(1).await.unwrap(), Step::continuous(1, 10).unwrap());
    assert!(matches!(
        engine.remove_at(3).await,
        Err(EngineError::IndexOutOfRange { index: 3, len: 1 })
    ));
    engine.clear().await.unwrap();
    assert!(engine.steps().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_run_after_completion() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.run().await.unwrap();
    events_until_end(&mut events).await;

    device.clear_log();
    let first = engine.status().await.unwrap();
    assert!(first.run_id.is_none());

    engine.run().await.unwrap();
    events_until_end(&mut events).await;
    assert_eq!(device.frames(), vec!["OFF 1\n", "OFF\n"]);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_during_run() {
    let device = MockTransport::new();
    device.push_line("12.5\n");
    device.push_line("oops\n");
    device.push_line("13.0\n");

    let (engine, mut events) = start(Settings::default(), &device);
    engine.append(Step::continuous(10, 50).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    let mut samples = Vec::new();
    while samples.len() < 2 {
        match events.recv().await {
            Some(EngineEvent::SampleAppended(sample)) => samples.push(sample),
            Some(_) => {}
            None => panic!("engine stopped"),
        }
    }

    assert_eq!(
        samples,
        vec![
            Sample {
                sequence_index: 0,
                value: 12.5
            },
            Sample {
                sequence_index: 1,
                value: 13.0
            }
        ]
    );
    assert_eq!(engine.samples_since(1).await.unwrap(), vec![samples[1]]);
    assert_eq!(device.unread_lines(), 0);

    // Telemetry never writes to the device.
    assert_eq!(device.frames(), vec!["ON 10 50\n"]);
}

#[tokio::test(start_paused = true)]
async fn test_sensor_view_requires_running() {
    let device = MockTransport::new();
    let (engine, _events) = start(quiet_settings(), &device);

    assert!(matches!(
        engine.open_sensor_view().await,
        Err(EngineError::NotRunning)
    ));

    engine.append(Step::dark(5).unwrap()).await.unwrap();
    engine.run().await.unwrap();
    device.push_line("7\n");
    engine.open_sensor_view().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.samples_since(0).await.unwrap().len(), 1);

    engine.close_sensor_view().await.unwrap();
    device.push_line("8\n");
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.samples_since(0).await.unwrap().len(), 1);
    assert_eq!(device.unread_lines(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sampler_stops_reading_after_run() {
    let device = MockTransport::new();
    let (engine, mut events) = start(Settings::default(), &device);

    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.run().await.unwrap();
    events_until_end(&mut events).await;

    device.push_line("99\n");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(device.unread_lines(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_run_turns_light_off() {
    let device = MockTransport::new();
    let (events_tx, _events) = tokio::sync::mpsc::unbounded_channel();
    let (engine, task) = Engine::new(quiet_settings(), device.clone(), events_tx).spawn();

    engine.append(Step::continuous(60, 100).unwrap()).await.unwrap();
    engine.run().await.unwrap();
    engine.shutdown().await.unwrap();
    task.await.unwrap();

    assert_eq!(device.frames(), vec!["ON 60 100\n", "OFF\n"]);
    assert!(matches!(
        engine.status().await,
        Err(EngineError::EngineClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_device_lost_still_returns_to_idle() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::continuous(5, 40).unwrap()).await.unwrap();
    engine.append(Step::dark(5).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    device.set_connected(false);

    let err = engine.stop().await.unwrap_err();
    assert!(err.is_device_fault());

    let status = engine.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.run_id.is_none());

    device.set_connected(true);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(device.frames(), vec!["ON 5 40\n"]);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(!seen.contains(&EngineEvent::RunFinished));
    assert!(progress(&seen).ends_with(&[
        (0, StepProgress::NotStarted),
        (1, StepProgress::NotStarted)
    ]));
}

#[tokio::test(start_paused = true)]
async fn test_failed_final_off_faults_instead_of_finishing() {
    let device = MockTransport::new();
    let (engine, mut events) = start(quiet_settings(), &device);

    engine.append(Step::dark(1).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    // The closing sentinel fails; the best-effort retry after the fault succeeds.
    device.fail_next_sends(1);
    let seen = events_until_end(&mut events).await;

    assert!(matches!(seen.last(), Some(EngineEvent::RunFaulted(_))));
    assert!(!seen.contains(&EngineEvent::RunFinished));
    assert_eq!(device.frames(), vec!["OFF 1\n", "OFF\n"]);
    assert_eq!(engine.status().await.unwrap().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_read_errors_do_not_abort_run() {
    let device = MockTransport::new();
    let (engine, mut events) = start(Settings::default(), &device);

    engine.append(Step::continuous(10, 50).unwrap()).await.unwrap();
    engine.run().await.unwrap();

    // Reads fail while the link is down; no frame is due, so the run survives.
    device.set_connected(false);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    device.set_connected(true);
    device.push_line("3.5\n");

    let sample = loop {
        match events.recv().await {
            Some(EngineEvent::SampleAppended(sample)) => break sample,
            Some(EngineEvent::RunFaulted(reason)) => panic!("run faulted: {}", reason),
            Some(_) => {}
            None => panic!("engine stopped"),
        }
    };
    assert_eq!(
        sample,
        Sample {
            sequence_index: 0,
            value: 3.5
        }
    );

    let status = engine.status().await.unwrap();
    assert_eq!(status.phase, Phase::Running);
    assert_eq!(status.latest_sample, Some(sample));
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_runs_keep_separate_series() {
    let device = MockTransport::new();
    let (engine, _events) = start(quiet_settings(), &device);

    engine.append(Step::dark(30).unwrap()).await.unwrap();
    engine.run().await.unwrap();
    device.push_line("1.0\n");
    engine.open_sensor_view().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.samples_since(0).await.unwrap().len(), 1);

    assert!(engine.stop().await.unwrap());
    engine.run().await.unwrap();
    assert!(engine.samples_since(0).await.unwrap().is_empty());

    // The first run's poll would have been due here; nothing may read this line.
    device.push_line("2.0\n");
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(engine.samples_since(0).await.unwrap().is_empty());
    assert_eq!(device.unread_lines(), 1);

    engine.open_sensor_view().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        engine.samples_since(0).await.unwrap(),
        vec![Sample {
            sequence_index: 0,
            value: 2.0
        }]
    );
}
