use std::sync::Arc;
use std::time::{Duration, Instant};

use eduvision_capture_engine::backend::{DevicePlan, SyntheticBackend};
use eduvision_capture_engine::{
    CaptureError, CaptureFormat, CaptureWorker, CameraRoster, SwitchReason, WorkerConfig,
    WorkerEvent, WorkerState,
};
use eduvision_common::error::{EduvisionError, EduvisionResult};
use eduvision_common::frame::Frame;
use eduvision_detection::{BoundingBox, Detection, DetectionEngine, DetectionModel, StaticModel};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

const DEADLINE: Duration = Duration::from_secs(5);

fn config(publish_capacity: usize) -> WorkerConfig {
    WorkerConfig {
        format: CaptureFormat {
            width: 32,
            height: 24,
            fps: 30,
            read_timeout: Duration::from_millis(100),
        },
        probe_limit: 5,
        publish_capacity,
        fps_window: 5,
    }
}

fn two_people() -> DetectionEngine {
    let boxes = vec![
        Detection::new(BoundingBox::new(2.0, 2.0, 10.0, 20.0), 0.9, 0),
        Detection::new(BoundingBox::new(14.0, 2.0, 22.0, 20.0), 0.7, 0),
        Detection::new(BoundingBox::new(24.0, 2.0, 30.0, 20.0), 0.4, 0),
    ];
    DetectionEngine::new(Box::new(StaticModel::new(boxes)))
}

fn worker(backend: &SyntheticBackend, publish_capacity: usize) -> CaptureWorker {
    CaptureWorker::new(
        Arc::new(backend.clone()),
        two_people(),
        config(publish_capacity),
    )
}

/// Next event, skipping over lag notices. `None` on timeout or close.
fn next_event(rx: &mut Receiver<WorkerEvent>, deadline: Duration) -> Option<WorkerEvent> {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        match rx.try_recv() {
            Ok(event) => return Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Lagged(_)) => {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Closed) => return None,
        }
    }
    None
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn failover_moves_to_next_camera_and_keeps_publishing() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::FailAfter(3))
        .with_device(1, DevicePlan::Healthy)
        .with_device(2, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = worker(&backend, 256);
    let mut rx = worker.subscribe();

    worker
        .start_with_roster(CameraRoster::from_indices([0, 1, 2]), None)
        .unwrap();

    let mut cameras_seen = Vec::new();
    let mut switched_to = None;
    let mut last_sequence = 0;
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        match event {
            WorkerEvent::Result(result) => {
                assert!(result.sequence > last_sequence);
                last_sequence = result.sequence;
                assert_eq!(result.person_count, 2);
                cameras_seen.push(result.camera_index);
                if result.camera_index == 1 && cameras_seen.len() >= 4 {
                    break;
                }
            }
            WorkerEvent::SourceChanged {
                index,
                reason: SwitchReason::Failover,
            } => switched_to = Some(index),
            WorkerEvent::SourceChanged { .. } => {}
            WorkerEvent::Failed(err) => panic!("worker failed: {err}"),
        }
    }

    assert_eq!(switched_to, Some(1));
    assert_eq!(cameras_seen.first(), Some(&0));
    assert_eq!(cameras_seen.last(), Some(&1));
    assert_ne!(worker.state(), WorkerState::Failed);
    assert_eq!(worker.active_camera(), Some(1));
    assert!(worker.stats().failovers >= 1);

    worker.stop();
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(backend.open_handles(), 0);
}

#[test]
fn single_unopenable_camera_exhausts_roster() {
    let backend = SyntheticBackend::new().with_device(0, DevicePlan::Unopenable);
    let mut worker = worker(&backend, 8);

    let err = worker
        .start_with_roster(CameraRoster::from_indices([0]), None)
        .unwrap_err();

    assert_eq!(err, CaptureError::RosterExhausted { attempted: vec![0] });
    assert_eq!(worker.state(), WorkerState::Failed);
    assert_eq!(worker.active_camera(), None);
    assert_eq!(backend.open_handles(), 0);

    // Failed is terminal: stop leaves it alone.
    worker.stop();
    assert_eq!(worker.state(), WorkerState::Failed);
}

#[test]
fn camera_dying_with_no_alternative_fails_the_worker() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::FailAfter(1))
        .with_frame_interval(Duration::from_millis(1));
    let mut worker = worker(&backend, 64);
    let mut rx = worker.subscribe();

    worker
        .start_with_roster(CameraRoster::from_indices([0]), None)
        .unwrap();

    let mut terminal = None;
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        if let WorkerEvent::Failed(err) = event {
            terminal = Some(err);
            break;
        }
    }

    assert_eq!(
        terminal,
        Some(CaptureError::RosterExhausted { attempted: vec![0] })
    );
    assert!(wait_until(DEADLINE, || worker.state() == WorkerState::Failed));
    assert!(wait_until(DEADLINE, || backend.open_handles() == 0));
    worker.stop();
    assert_eq!(worker.state(), WorkerState::Failed);
}

#[test]
fn switch_with_single_camera_is_refused() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = worker(&backend, 16);

    worker.start(None).unwrap();
    assert_eq!(worker.roster_len(), 1);
    assert!(wait_until(DEADLINE, || worker.latest().is_some()));

    assert!(!worker.switch_camera());
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(worker.active_camera(), Some(0));
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(worker.stats().switches, 0);

    worker.stop();
}

#[test]
fn requested_switch_moves_to_next_camera() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_device(1, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = worker(&backend, 256);
    let mut rx = worker.subscribe();

    worker.start(Some(0)).unwrap();
    assert!(wait_until(DEADLINE, || worker.latest().is_some()));
    assert!(worker.switch_camera());

    let mut switched = false;
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        if let WorkerEvent::SourceChanged {
            index: 1,
            reason: SwitchReason::Requested,
        } = event
        {
            switched = true;
            break;
        }
    }

    assert!(switched);
    assert_eq!(worker.active_camera(), Some(1));
    assert!(!backend.is_open(0));
    assert_eq!(worker.stats().switches, 1);
    worker.stop();
}

#[test]
fn preferred_camera_is_used_first() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_device(2, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = worker(&backend, 16);

    worker.start(Some(2)).unwrap();
    assert!(wait_until(DEADLINE, || worker.latest().is_some()));
    assert_eq!(worker.latest().map(|r| r.camera_index), Some(2));
    worker.stop();
}

#[test]
fn stop_releases_device_and_is_idempotent() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(5));
    let mut worker = worker(&backend, 16);

    worker.start(None).unwrap();
    assert!(wait_until(DEADLINE, || worker.latest().is_some()));
    assert!(backend.is_open(0));

    worker.stop();
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(backend.open_handles(), 0);
    assert_eq!(worker.active_camera(), None);

    worker.stop();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn no_camera_leaves_worker_idle_for_retry() {
    let backend = SyntheticBackend::new();
    let mut worker = worker(&backend, 4);

    assert_eq!(worker.start(None), Err(CaptureError::NoCameraAvailable));
    assert_eq!(worker.state(), WorkerState::Idle);
    assert_eq!(worker.start(None), Err(CaptureError::NoCameraAvailable));
}

#[test]
fn start_twice_is_rejected() {
    let backend = SyntheticBackend::new().with_device(0, DevicePlan::Healthy);
    let mut worker = worker(&backend, 4);
    worker.start(None).unwrap();
    assert!(matches!(
        worker.start(None),
        Err(CaptureError::InvalidState(_))
    ));
    worker.stop();
}

#[test]
fn slow_subscriber_loses_oldest_events_only() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(1));
    let mut worker = worker(&backend, 2);
    let mut rx = worker.subscribe();

    worker.start(None).unwrap();
    assert!(wait_until(DEADLINE, || worker.stats().frames_published >= 10));

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(n)) if n > 0));

    let mut previous = 0;
    for _ in 0..2 {
        match next_event(&mut rx, DEADLINE) {
            Some(WorkerEvent::Result(result)) => {
                assert!(result.sequence > previous);
                previous = result.sequence;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    worker.stop();
}

struct BrokenModel;

impl DetectionModel for BrokenModel {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn infer(&mut self, _frame: &Frame) -> EduvisionResult<Vec<Detection>> {
        Err(EduvisionError::detection("model crashed"))
    }
}

#[test]
fn detection_errors_skip_frames_without_failover() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_device(1, DevicePlan::Healthy)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = CaptureWorker::new(
        Arc::new(backend.clone()),
        DetectionEngine::new(Box::new(BrokenModel)),
        config(16),
    );

    worker.start(None).unwrap();
    assert!(wait_until(DEADLINE, || worker.stats().frames_skipped >= 3));

    let stats = worker.stats();
    assert_eq!(stats.frames_published, 0);
    assert_eq!(stats.failovers, 0);
    assert_eq!(worker.active_camera(), Some(0));
    assert!(worker.latest().is_none());
    worker.stop();
}

#[test]
fn switch_without_an_openable_alternative_keeps_current_camera() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::Healthy)
        .with_device(1, DevicePlan::Unopenable)
        .with_frame_interval(Duration::from_millis(2));
    let mut worker = worker(&backend, 256);
    let mut rx = worker.subscribe();

    worker
        .start_with_roster(CameraRoster::from_indices([0, 1]), None)
        .unwrap();
    assert!(wait_until(DEADLINE, || worker.latest().is_some()));
    assert_eq!(worker.usable_cameras(), 2);

    // Camera 1 is only found broken by trying it.
    assert!(worker.switch_camera());
    assert!(wait_until(DEADLINE, || worker.usable_cameras() == 1));
    assert!(wait_until(DEADLINE, || worker.state() == WorkerState::Running));

    assert!(!worker.switch_camera());

    let mut results_after = 0;
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        match event {
            WorkerEvent::SourceChanged {
                reason: SwitchReason::Initial,
                ..
            } => {}
            WorkerEvent::SourceChanged { index, reason } => {
                panic!("camera changed to {index} ({reason:?})")
            }
            WorkerEvent::Result(result) => {
                assert_eq!(result.camera_index, 0);
                results_after += 1;
                if results_after >= 5 {
                    break;
                }
            }
            WorkerEvent::Failed(err) => panic!("worker failed: {err}"),
        }
    }

    assert_eq!(results_after, 5);
    assert_eq!(worker.active_camera(), Some(0));
    assert!(backend.is_open(0));
    assert!(!backend.is_open(1));
    assert_eq!(worker.stats().switches, 0);
    worker.stop();
    assert_eq!(backend.open_handles(), 0);
}

#[test]
fn single_read_failure_keeps_camera_in_rotation() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::FailAfter(3))
        .with_device(1, DevicePlan::FailAfter(3))
        .with_frame_interval(Duration::from_millis(1));
    let mut worker = worker(&backend, 256);
    let mut rx = worker.subscribe();

    worker
        .start_with_roster(CameraRoster::from_indices([0, 1]), None)
        .unwrap();

    let mut failover_targets = Vec::new();
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        match event {
            WorkerEvent::SourceChanged {
                index,
                reason: SwitchReason::Failover,
            } => {
                failover_targets.push(index);
                if failover_targets.len() >= 3 {
                    break;
                }
            }
            WorkerEvent::Failed(err) => panic!("worker failed: {err}"),
            _ => {}
        }
    }

    assert_eq!(failover_targets, vec![1, 0, 1]);
    assert!(worker.stats().failovers >= 3);
    assert_eq!(worker.usable_cameras(), 2);
    assert_ne!(worker.state(), WorkerState::Failed);
    worker.stop();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn preferred_camera_outside_roster_is_retried_by_failover() {
    let backend = SyntheticBackend::new()
        .with_device(0, DevicePlan::FailAfter(3))
        .with_device(4, DevicePlan::FailAfter(3))
        .with_frame_interval(Duration::from_millis(1));
    let mut worker = worker(&backend, 256);
    let mut rx = worker.subscribe();

    worker
        .start_with_roster(CameraRoster::from_indices([0]), Some(4))
        .unwrap();
    assert_eq!(worker.roster_len(), 2);

    let mut failover_targets = Vec::new();
    while let Some(event) = next_event(&mut rx, DEADLINE) {
        match event {
            WorkerEvent::SourceChanged {
                index,
                reason: SwitchReason::Failover,
            } => {
                failover_targets.push(index);
                if failover_targets.len() >= 2 {
                    break;
                }
            }
            WorkerEvent::Failed(err) => panic!("worker failed: {err}"),
            _ => {}
        }
    }

    assert_eq!(failover_targets, vec![0, 4]);
    worker.stop();
    assert_eq!(backend.open_handles(), 0);
}
