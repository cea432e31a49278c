//! Presentation sink for scan lifecycle events.
//!
//! A [`ScanOutputPort`] is whatever shows or stores scan progress (a GUI
//! panel, a file writer, the log). It never talks to the orchestrator:
//! [`ScanOutputBridge`] subscribes to the event bus and forwards scan events
//! to the port.

use crate::events::{DomainEvent, EventBus, EventType, SubscriptionId};
use crate::scan::{FlyScanConfig, Measurement, Position2D, StepScanConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Progress report for one acquired point.
#[derive(Debug, Clone, Copy)]
pub struct ScanProgressUpdate<'a> {
    /// Scan identifier
    pub scan_id: Uuid,
    /// Points acquired, this one included
    pub points_done: usize,
    /// Points in the scan
    pub total_points: usize,
    /// Where the point was measured
    pub position: Position2D,
    /// Averaged measurement
    pub measurement: &'a Measurement,
}

impl ScanProgressUpdate<'_> {
    /// Completion percentage.
    pub fn percentage(&self) -> f64 {
        if self.total_points == 0 {
            0.0
        } else {
            self.points_done as f64 / self.total_points as f64 * 100.0
        }
    }
}

/// Receives scan lifecycle notifications. Every method defaults to a no-op.
pub trait ScanOutputPort: Send + Sync {
    /// Scan entered RUNNING.
    fn present_scan_started(&self, _scan_id: Uuid, _config: &StepScanConfig) {}

    /// Fly scan entered RUNNING, planning `expected_points` samples.
    fn present_fly_scan_started(
        &self,
        _scan_id: Uuid,
        _config: &FlyScanConfig,
        _expected_points: usize,
    ) {
    }

    /// A point was recorded.
    fn present_scan_progress(&self, _update: ScanProgressUpdate<'_>) {}

    /// Scan completed.
    fn present_scan_completed(&self, _scan_id: Uuid, _total_points: usize) {}

    /// Scan failed.
    fn present_scan_failed(&self, _scan_id: Uuid, _reason: &str) {}

    /// Scan cancelled.
    fn present_scan_cancelled(&self, _scan_id: Uuid, _points_acquired: usize) {}

    /// Scan paused before `current_point_index`.
    fn present_scan_paused(&self, _scan_id: Uuid, _current_point_index: usize) {}

    /// Scan resumed at `resume_from_point_index`.
    fn present_scan_resumed(&self, _scan_id: Uuid, _resume_from_point_index: usize) {}
}

/// Forwards scan events from a bus to a [`ScanOutputPort`].
///
/// Subscriptions are removed when the bridge is dropped.
pub struct ScanOutputBridge {
    bus: Arc<EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl ScanOutputBridge {
    /// Subscribe `port` to every scan event on `bus`.
    pub fn attach(bus: Arc<EventBus>, port: Arc<dyn ScanOutputPort>) -> Self {
        let total_points = AtomicUsize::new(0);
        let subscriptions = bus.subscribe_many(&EventType::SCAN, move |event| {
            forward(port.as_ref(), &total_points, event);
            Ok(())
        });
        Self { bus, subscriptions }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stop forwarding. Same as dropping the bridge.
    pub fn detach(self) {}
}

impl Drop for ScanOutputBridge {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

fn forward(port: &dyn ScanOutputPort, total_points: &AtomicUsize, event: &DomainEvent) {
    match event {
        DomainEvent::ScanStarted { scan_id, config } => {
            total_points.store(config.total_points(), Ordering::SeqCst);
            port.present_scan_started(*scan_id, config);
        }
        DomainEvent::FlyScanStarted {
            scan_id,
            config,
            expected_points,
        } => {
            total_points.store(*expected_points, Ordering::SeqCst);
            port.present_fly_scan_started(*scan_id, config, *expected_points);
        }
        DomainEvent::ScanPointAcquired {
            scan_id,
            point_index,
            position,
            measurement,
        } => port.present_scan_progress(ScanProgressUpdate {
            scan_id: *scan_id,
            points_done: point_index + 1,
            total_points: total_points.load(Ordering::SeqCst),
            position: *position,
            measurement,
        }),
        DomainEvent::ScanCompleted {
            scan_id,
            total_points,
        } => port.present_scan_completed(*scan_id, *total_points),
        DomainEvent::ScanFailed { scan_id, reason } => port.present_scan_failed(*scan_id, reason),
        DomainEvent::ScanCancelled {
            scan_id,
            points_acquired,
        } => port.present_scan_cancelled(*scan_id, *points_acquired),
        DomainEvent::ScanPaused {
            scan_id,
            current_point_index,
        } => port.present_scan_paused(*scan_id, *current_point_index),
        DomainEvent::ScanResumed {
            scan_id,
            resume_from_point_index,
        } => port.present_scan_resumed(*scan_id, *resume_from_point_index),
        _ => {}
    }
}

/// Writes scan progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl ScanOutputPort for LogPresenter {
    fn present_scan_started(&self, scan_id: Uuid, config: &StepScanConfig) {
        tracing::info!(
            %scan_id,
            points = config.total_points(),
            pattern = %config.pattern(),
            "Scan started"
        );
    }

    fn present_fly_scan_started(
        &self,
        scan_id: Uuid,
        config: &FlyScanConfig,
        expected_points: usize,
    ) {
        tracing::info!(
            %scan_id,
            expected_points,
            rate_hz = config.acquisition_rate_hz(),
            pattern = %config.pattern(),
            "Fly scan started"
        );
    }

    fn present_scan_progress(&self, update: ScanProgressUpdate<'_>) {
        tracing::info!(
            "[{}/{}] {:5.1}% at {} |V| = {:.4e} V",
            update.points_done,
            update.total_points,
            update.percentage(),
            update.position,
            update.measurement.in_phase_magnitude()
        );
    }

    fn present_scan_completed(&self, scan_id: Uuid, total_points: usize) {
        tracing::info!(%scan_id, total_points, "Scan completed");
    }

    fn present_scan_failed(&self, scan_id: Uuid, reason: &str) {
        tracing::error!(%scan_id, reason, "Scan failed");
    }

    fn present_scan_cancelled(&self, scan_id: Uuid, points_acquired: usize) {
        tracing::warn!(%scan_id, points_acquired, "Scan cancelled");
    }

    fn present_scan_paused(&self, scan_id: Uuid, current_point_index: usize) {
        tracing::info!(%scan_id, current_point_index, "Scan paused");
    }

    fn present_scan_resumed(&self, scan_id: Uuid, resume_from_point_index: usize) {
        tracing::info!(%scan_id, resume_from_point_index, "Scan resumed");
    }
}
