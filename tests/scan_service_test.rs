//! Integration tests for the step-scan orchestrator against mock hardware.

mod common;

use common::{grid, wait_until, EventRecorder};
use rust_scan::events::{DomainEvent, EventBus, EventType};
use rust_scan::experiment::{ScanApplicationService, ScanServiceSettings};
use rust_scan::hardware::mock::{
    ErrorConfig, ErrorScenario, MockAcquisitionDevice, MockMotionStage,
};
use rust_scan::hardware::MotionPort;
use rust_scan::scan::{
    MeasurementUncertainty, MotionState, Position2D, ScanPattern, ScanStatus, ScanZone,
    StepScanConfig,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    bus: Arc<EventBus>,
    recorder: EventRecorder,
    stage: MockMotionStage,
    detector: MockAcquisitionDevice,
    service: Arc<ScanApplicationService>,
}

fn harness(stage: MockMotionStage, detector: MockAcquisitionDevice) -> Harness {
    harness_with(stage, detector, ScanServiceSettings::default())
}

fn harness_with(
    stage: MockMotionStage,
    detector: MockAcquisitionDevice,
    settings: ScanServiceSettings,
) -> Harness {
    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::attach(&bus);
    let service = Arc::new(
        ScanApplicationService::new(
            Arc::new(stage.clone()),
            Arc::new(detector.clone()),
            Arc::clone(&bus),
        )
        .with_settings(settings),
    );
    Harness {
        bus,
        recorder,
        stage,
        detector,
        service,
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_serpentine_scan_completes() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());

    assert!(h.service.execute_scan(grid(2, 2, ScanPattern::Serpentine)).await);

    assert_eq!(
        h.recorder.types(),
        vec![
            EventType::ScanStarted,
            EventType::ScanPointAcquired,
            EventType::ScanPointAcquired,
            EventType::ScanPointAcquired,
            EventType::ScanPointAcquired,
            EventType::ScanCompleted,
        ]
    );

    let indices: Vec<usize> = h
        .recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            DomainEvent::ScanPointAcquired { point_index, .. } => Some(*point_index),
            _ => None,
        })
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    assert_eq!(
        h.stage.move_history(),
        vec![
            Position2D::new(0.0, 0.0),
            Position2D::new(1.0, 0.0),
            Position2D::new(1.0, 1.0),
            Position2D::new(0.0, 1.0),
        ]
    );

    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Completed);
    assert_eq!(scan.results().len(), 4);
    assert!(scan.end_time().is_some());
    // first point has no motion, every other motion ran to completion
    assert_eq!(scan.motions().len(), 3);
    assert!(scan
        .motions()
        .iter()
        .all(|m| m.execution_motion_id().is_some() && m.actual_duration().is_some()));

    let status = h.service.status();
    assert_eq!(status.status, Some(ScanStatus::Completed));
    assert!(!status.is_running);
    assert_eq!(status.progress_percentage, 100.0);
    assert!(!h.service.is_busy());
}

#[tokio::test]
async fn test_raster_two_by_two_over_ten_millimetres() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let config = StepScanConfig::builder(ScanZone::new(0.0, 10.0, 0.0, 10.0).unwrap())
        .points(2, 2)
        .pattern(ScanPattern::Raster)
        .build()
        .unwrap();

    assert!(h.service.execute_scan(config).await);

    assert_eq!(h.stage.move_count(), 4);
    assert_eq!(
        h.stage.move_history(),
        vec![
            Position2D::new(0.0, 0.0),
            Position2D::new(10.0, 0.0),
            Position2D::new(0.0, 10.0),
            Position2D::new(10.0, 10.0),
        ]
    );
    assert_eq!(h.recorder.count(EventType::ScanPointAcquired), 4);
    match h.recorder.events().pop() {
        Some(DomainEvent::ScanCompleted { total_points, .. }) => assert_eq!(total_points, 4),
        other => panic!("expected ScanCompleted last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scan_configures_hardware() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let uncertainty = MeasurementUncertainty::new(0.5).unwrap();
    let config = StepScanConfig::builder(ScanZone::new(0.0, 2.0, 0.0, 2.0).unwrap())
        .points(2, 1)
        .averaging_per_position(3)
        .measurement_uncertainty(uncertainty)
        .motion_speed_mm_s(Some(2.5))
        .build()
        .unwrap();

    assert!(h.service.execute_scan(config).await);

    assert_eq!(h.stage.speed(), Some(2.5));
    assert_eq!(h.detector.configured_target(), Some(uncertainty));
    assert_eq!(h.detector.sample_count(), 6);
    let scan = h.service.take_last_scan().unwrap();
    assert!(scan.results().iter().all(|r| r.measurement.sample_count == 3));
}

#[tokio::test]
async fn test_uncertainty_retry_grows_averaging() {
    let detector = MockAcquisitionDevice::builder()
        .noise_amplitude(0.01)
        .seed(11)
        .build();
    let h = harness(MockMotionStage::new(), detector);
    // unreachable target: every attempt misses
    let config = StepScanConfig::builder(ScanZone::new(0.0, 1.0, 0.0, 1.0).unwrap())
        .averaging_per_position(2)
        .measurement_uncertainty(MeasurementUncertainty::new(1e-12).unwrap())
        .build()
        .unwrap();

    assert!(h.service.execute_scan(config).await);

    // 2 + 4 + 8 samples over the three attempts
    assert_eq!(h.detector.sample_count(), 14);
    let scan = h.service.take_last_scan().unwrap();
    let measurement = &scan.results()[0].measurement;
    assert_eq!(measurement.sample_count, 8);
    assert!(measurement.uncertainty_estimate_volts.unwrap() > 1e-12);
}

// =============================================================================
// Control: cancel and pause
// =============================================================================

#[tokio::test]
async fn test_cancel_after_first_point() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let control = h.service.control();
    h.bus.subscribe(EventType::ScanPointAcquired, move |_| {
        control.request_cancel();
        Ok(())
    });

    assert!(!h.service.execute_scan(grid(2, 2, ScanPattern::Raster)).await);

    assert_eq!(
        h.recorder.types(),
        vec![
            EventType::ScanStarted,
            EventType::ScanPointAcquired,
            EventType::ScanCancelled,
        ]
    );
    let cancelled = h.recorder.events().pop().unwrap();
    assert!(matches!(
        cancelled,
        DomainEvent::ScanCancelled {
            points_acquired: 1,
            ..
        }
    ));
    assert_eq!(h.stage.move_count(), 1);
    assert_eq!(
        h.service.take_last_scan().unwrap().status(),
        ScanStatus::Cancelled
    );
}

#[tokio::test]
async fn test_pause_and_resume_between_points() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());

    let control = h.service.control();
    h.bus.subscribe(EventType::ScanPointAcquired, move |event| {
        if let DomainEvent::ScanPointAcquired { point_index: 0, .. } = event {
            control.request_pause();
        }
        Ok(())
    });
    let control = h.service.control();
    h.bus.subscribe(EventType::ScanPaused, move |_| {
        control.request_resume();
        Ok(())
    });

    assert!(h.service.execute_scan(grid(3, 1, ScanPattern::Raster)).await);

    assert_eq!(
        h.recorder.types(),
        vec![
            EventType::ScanStarted,
            EventType::ScanPointAcquired,
            EventType::ScanPaused,
            EventType::ScanResumed,
            EventType::ScanPointAcquired,
            EventType::ScanPointAcquired,
            EventType::ScanCompleted,
        ]
    );
    let events = h.recorder.events();
    assert!(matches!(
        events[2],
        DomainEvent::ScanPaused {
            current_point_index: 1,
            ..
        }
    ));
    assert!(matches!(
        events[3],
        DomainEvent::ScanResumed {
            resume_from_point_index: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_pause_from_another_task() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());

    let handle = Arc::clone(&h.service).spawn_scan(grid(2, 2, ScanPattern::Raster));
    // flags were reset synchronously, so this pause applies to the new scan
    h.service.pause_scan();

    let service = Arc::clone(&h.service);
    assert!(wait_until(Duration::from_secs(2), move || service.status().is_paused).await);
    assert_eq!(h.service.status().current_point_index, 0);
    assert_eq!(h.stage.move_count(), 0);

    h.service.resume_scan();
    assert!(handle.await.unwrap());
    assert_eq!(h.recorder.count(EventType::ScanPaused), 1);
    assert_eq!(h.recorder.count(EventType::ScanResumed), 1);
    assert_eq!(h.recorder.count(EventType::ScanPointAcquired), 4);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let control = h.service.control();
    h.bus.subscribe(EventType::ScanPointAcquired, move |_| {
        control.request_pause();
        Ok(())
    });
    let control = h.service.control();
    h.bus.subscribe(EventType::ScanPaused, move |_| {
        control.request_cancel();
        Ok(())
    });

    assert!(!h.service.execute_scan(grid(2, 2, ScanPattern::Raster)).await);

    assert_eq!(h.recorder.count(EventType::ScanResumed), 0);
    assert_eq!(h.recorder.count(EventType::ScanCancelled), 1);
    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Cancelled);
    assert_eq!(scan.results().len(), 1);
}

#[tokio::test]
async fn test_second_scan_rejected_while_busy() {
    let stage = MockMotionStage::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::Stall {
            operation: "wait_until_stopped",
        }))
        .build();
    let h = harness(stage, MockAcquisitionDevice::new());

    let handle = Arc::clone(&h.service).spawn_scan(grid(2, 2, ScanPattern::Raster));
    assert!(h.service.is_busy());
    assert!(!h.service.execute_scan(grid(1, 1, ScanPattern::Raster)).await);

    // cancellation reaches the stalled motion wait
    h.service.cancel_scan();
    assert!(!handle.await.unwrap());
    assert!(!h.service.is_busy());
    assert_eq!(h.recorder.count(EventType::ScanStarted), 1);
    assert_eq!(h.recorder.count(EventType::ScanCancelled), 1);
    assert!(!h.stage.is_moving().await.unwrap());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_acquisition_failure_fails_scan() {
    let detector = MockAcquisitionDevice::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "acquire_sample",
            count: 2,
        }))
        .build();
    let h = harness(MockMotionStage::new(), detector);

    assert!(!h.service.execute_scan(grid(2, 2, ScanPattern::Raster)).await);

    assert_eq!(h.recorder.count(EventType::ScanPointAcquired), 2);
    assert_eq!(h.recorder.count(EventType::ScanCompleted), 0);
    let failed = h.recorder.events().pop().unwrap();
    match failed {
        DomainEvent::ScanFailed { reason, .. } => assert!(reason.contains("Injected failure")),
        other => panic!("expected ScanFailed, got {other:?}"),
    }

    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Failed);
    assert_eq!(scan.results().len(), 2);
    assert!(scan.failure_reason().is_some());
}

#[tokio::test]
async fn test_motion_timeout_fails_scan() {
    let stage = MockMotionStage::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::Stall {
            operation: "wait_until_stopped",
        }))
        .build();
    let settings = ScanServiceSettings {
        move_timeout: Duration::from_millis(50),
        ..ScanServiceSettings::default()
    };
    let h = harness_with(stage, MockAcquisitionDevice::new(), settings);

    assert!(!h.service.execute_scan(grid(2, 1, ScanPattern::Raster)).await);

    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Failed);
    assert!(scan.failure_reason().unwrap().contains("did not stop within"));
    assert!(scan.results().is_empty());
    // the stage was told to stop after the timeout
    assert!(!h.stage.is_moving().await.unwrap());
    assert_eq!(h.detector.sample_count(), 0);
}

#[tokio::test]
async fn test_move_rejected_outside_stage_limits() {
    use rust_scan::hardware::mock::StageLimits;

    let stage = MockMotionStage::builder()
        .limits(StageLimits::hard_stop(5.0, 5.0))
        .build();
    let h = harness(stage, MockAcquisitionDevice::new());
    let config = StepScanConfig::builder(ScanZone::new(0.0, 10.0, 0.0, 1.0).unwrap())
        .points(3, 1)
        .build()
        .unwrap();

    assert!(!h.service.execute_scan(config).await);
    // 0 and 5 mm are reachable, 10 mm is not
    assert_eq!(h.recorder.count(EventType::ScanPointAcquired), 2);
    assert_eq!(h.recorder.count(EventType::ScanFailed), 1);

    // the refused move is recorded on the motion that led to the point
    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.motions()[0].execution_state(), MotionState::Completed);
    let refused = &scan.motions()[1];
    assert_eq!(refused.execution_state(), MotionState::Failed);
    assert!(refused.execution_motion_id().is_none());
    assert!(refused.failure_reason().is_some());
}

#[tokio::test]
async fn test_failed_move_command_marks_motion_failed() {
    let stage = MockMotionStage::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "move_to",
            count: 1,
        }))
        .build();
    let h = harness(stage, MockAcquisitionDevice::new());

    assert!(!h.service.execute_scan(grid(2, 1, ScanPattern::Raster)).await);

    let scan = h.service.take_last_scan().unwrap();
    assert_eq!(scan.status(), ScanStatus::Failed);
    assert_eq!(scan.results().len(), 1);
    assert_eq!(scan.motions()[0].execution_state(), MotionState::Failed);
    assert!(scan.motions()[0]
        .failure_reason()
        .unwrap()
        .contains("Injected failure"));
}

#[tokio::test]
async fn test_huge_stabilization_delay_does_not_panic() {
    let h = harness(MockMotionStage::new(), MockAcquisitionDevice::new());
    let config = StepScanConfig::builder(ScanZone::new(0.0, 10.0, 0.0, 10.0).unwrap())
        .points(32, 32)
        .stabilization_delay_ms(u64::MAX)
        .build()
        .unwrap();

    let handle = Arc::clone(&h.service).spawn_scan(config);
    let r = h.recorder.clone();
    assert!(wait_until(Duration::from_secs(2), move || r.count(EventType::ScanStarted) == 1).await);
    assert_eq!(h.service.status().status, Some(ScanStatus::Running));

    // the scan is parked in its first settling delay
    h.service.cancel_scan();
    assert!(!handle.await.unwrap());
    assert_eq!(h.recorder.count(EventType::ScanCancelled), 1);
}
