//! Integration tests for fly scans against mock hardware.
//!
//! Sampling is scheduled on the tokio clock, so these run with time paused.

mod common;

use common::{grid, wait_until, EventRecorder};
use rust_scan::events::{DomainEvent, EventBus, EventType};
use rust_scan::experiment::ScanApplicationService;
use rust_scan::hardware::mock::{
    ErrorConfig, ErrorScenario, MockAcquisitionDevice, MockMotionStage,
};
use rust_scan::scan::{
    AcquisitionRateCapability, FlyScan, FlyScanConfig, MotionProfile, MotionState, Position2D,
    ScanPattern, ScanStatus, ScanZone,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    recorder: EventRecorder,
    stage: MockMotionStage,
    service: Arc<ScanApplicationService>,
}

fn harness(stage: MockMotionStage, detector: MockAcquisitionDevice) -> Harness {
    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::attach(&bus);
    let service = Arc::new(ScanApplicationService::new(
        Arc::new(stage.clone()),
        Arc::new(detector),
        bus,
    ));
    Harness {
        recorder,
        stage,
        service,
    }
}

/// 2 x 2 raster over 10 mm at 10 Hz, needing 5 Hz for a 2 mm gap.
fn fly_config() -> FlyScanConfig {
    FlyScanConfig::builder(
        ScanZone::new(0.0, 10.0, 0.0, 10.0).unwrap(),
        MotionProfile::default_fast(),
    )
    .points(2, 2)
    .pattern(ScanPattern::Raster)
    .acquisition_rate_hz(10.0)
    .max_spatial_gap_mm(2.0)
    .build()
    .unwrap()
}

fn capability(rate_hz: f64) -> AcquisitionRateCapability {
    AcquisitionRateCapability::new(rate_hz, rate_hz / 100.0, Duration::from_secs(1), 100).unwrap()
}

fn expected_points() -> usize {
    FlyScan::new(fly_config()).unwrap().expected_points()
}

fn sample_indices(recorder: &EventRecorder) -> Vec<usize> {
    recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            DomainEvent::ScanPointAcquired { point_index, .. } => Some(*point_index),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fly_scan_samples_every_segment() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let expected = expected_points();
    assert!(expected > 3);

    assert!(h.service.execute_fly_scan(fly_config(), capability(100.0)).await);

    let events = h.recorder.events();
    match events.first() {
        Some(DomainEvent::FlyScanStarted {
            expected_points, ..
        }) => assert_eq!(*expected_points, expected),
        other => panic!("expected FlyScanStarted first, got {other:?}"),
    }
    match events.last() {
        Some(DomainEvent::ScanCompleted { total_points, .. }) => {
            assert_eq!(*total_points, expected)
        }
        other => panic!("expected ScanCompleted last, got {other:?}"),
    }
    assert_eq!(sample_indices(&h.recorder), (0..expected).collect::<Vec<_>>());

    // origin, then one move per segment
    assert_eq!(
        h.stage.move_history(),
        vec![
            Position2D::new(0.0, 0.0),
            Position2D::new(10.0, 0.0),
            Position2D::new(0.0, 10.0),
            Position2D::new(10.0, 10.0),
        ]
    );
    assert_eq!(h.stage.speed(), Some(10.0));

    let scan = h.service.take_last_fly_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Completed);
    assert_eq!(scan.results().len(), expected);
    assert_eq!(scan.results()[0].position, Position2D::new(0.0, 0.0));
    assert!(scan
        .results()
        .iter()
        .all(|r| scan.config().zone().contains(&r.position)));
    assert!(scan
        .motions()
        .iter()
        .all(|m| m.execution_state() == MotionState::Completed));
    assert!(h.service.take_last_scan().is_none());

    let status = h.service.status();
    assert_eq!(status.status, Some(ScanStatus::Completed));
    assert_eq!(status.progress_percentage, 100.0);
    assert!(!h.service.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_samples_follow_the_schedule() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let started = tokio::time::Instant::now();

    assert!(h.service.execute_fly_scan(fly_config(), capability(100.0)).await);

    // the last sample of each segment is due (count - 1) / rate after its move
    let scan = h.service.take_last_fly_scan().unwrap();
    let scheduled: f64 = scan
        .motions()
        .iter()
        .map(|m| (m.sample_count(10.0) - 1) as f64 / 10.0)
        .sum();
    assert!(started.elapsed().as_secs_f64() >= scheduled - 1e-6);
}

// =============================================================================
// Capability check
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_detector_refuses_without_moving() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());

    // 4 Hz cannot keep a 2 mm gap at 10 mm/s
    assert!(!h.service.execute_fly_scan(fly_config(), capability(4.0)).await);

    assert!(h.recorder.events().is_empty());
    assert_eq!(h.stage.move_count(), 0);
    assert!(h.service.take_last_fly_scan().is_none());
    assert!(!h.service.is_busy());
}

// =============================================================================
// Control
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_flight() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let handle = Arc::clone(&h.service).spawn_fly_scan(fly_config(), capability(100.0));

    let r = h.recorder.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || r.count(EventType::ScanPointAcquired) >= 1)
            .await
    );
    h.service.cancel_scan();
    assert!(!handle.await.unwrap());

    let scan = h.service.take_last_fly_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Cancelled);
    assert!(!scan.results().is_empty());
    assert!(scan.results().len() < expected_points());
    assert!(scan
        .motions()
        .iter()
        .any(|m| m.execution_state() == MotionState::Failed
            && m.failure_reason() == Some("cancelled")));

    match h.recorder.events().last() {
        Some(DomainEvent::ScanCancelled {
            points_acquired, ..
        }) => assert_eq!(*points_acquired, scan.results().len()),
        other => panic!("expected ScanCancelled, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_between_segments() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let handle = Arc::clone(&h.service).spawn_fly_scan(fly_config(), capability(100.0));
    h.service.pause_scan();

    let r = h.recorder.clone();
    assert!(wait_until(Duration::from_secs(5), move || r.count(EventType::ScanPaused) == 1).await);
    assert_eq!(h.recorder.count(EventType::ScanPointAcquired), 0);
    assert!(h.service.status().is_paused);

    h.service.resume_scan();
    assert!(handle.await.unwrap());
    assert_eq!(h.recorder.count(EventType::ScanResumed), 1);
    assert_eq!(sample_indices(&h.recorder).len(), expected_points());
}

#[tokio::test(start_paused = true)]
async fn test_busy_service_rejects_second_scan() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let handle = Arc::clone(&h.service).spawn_fly_scan(fly_config(), capability(100.0));

    let r = h.recorder.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || r.count(EventType::ScanPointAcquired) >= 1)
            .await
    );
    assert!(h.service.is_busy());
    assert!(!h.service.execute_fly_scan(fly_config(), capability(100.0)).await);
    assert!(!h.service.execute_scan(grid(2, 2, ScanPattern::Raster)).await);
    assert_eq!(h.recorder.count(EventType::FlyScanStarted), 1);
    assert_eq!(h.recorder.count(EventType::ScanStarted), 0);

    h.service.cancel_scan();
    assert!(!handle.await.unwrap());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_detector_failure_fails_the_segment() {
    let detector = MockAcquisitionDevice::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "acquire_sample",
            count: 3,
        }))
        .build();
    let h = harness(MockMotionStage::new(), detector);

    assert!(!h.service.execute_fly_scan(fly_config(), capability(100.0)).await);

    let scan = h.service.take_last_fly_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Failed);
    assert_eq!(scan.results().len(), 3);
    assert!(scan.failure_reason().is_some());
    assert_eq!(scan.motions()[0].execution_state(), MotionState::Failed);
    assert_eq!(scan.motions()[1].execution_state(), MotionState::Pending);
    assert_eq!(h.recorder.count(EventType::ScanFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_move_fails_the_segment() {
    let stage = MockMotionStage::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "move_to",
            count: 2,
        }))
        .build();
    let h = harness(stage, MockAcquisitionDevice::new());

    assert!(!h.service.execute_fly_scan(fly_config(), capability(100.0)).await);

    // origin and the first segment were commanded, the second was refused
    let scan = h.service.take_last_fly_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Failed);
    assert_eq!(scan.motions()[0].execution_state(), MotionState::Completed);
    assert_eq!(scan.motions()[1].execution_state(), MotionState::Failed);
    assert!(scan.motions()[1].execution_motion_id().is_none());
}
