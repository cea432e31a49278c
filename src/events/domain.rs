//! Domain events published by the scan and continuous acquisition loops.

use crate::scan::{FlyScanConfig, Measurement, Position2D, StepScanConfig};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Subscription key: one per [`DomainEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    /// [`DomainEvent::ScanStarted`]
    ScanStarted,
    /// [`DomainEvent::FlyScanStarted`]
    FlyScanStarted,
    /// [`DomainEvent::ScanPointAcquired`]
    ScanPointAcquired,
    /// [`DomainEvent::ScanCompleted`]
    ScanCompleted,
    /// [`DomainEvent::ScanFailed`]
    ScanFailed,
    /// [`DomainEvent::ScanCancelled`]
    ScanCancelled,
    /// [`DomainEvent::ScanPaused`]
    ScanPaused,
    /// [`DomainEvent::ScanResumed`]
    ScanResumed,
    /// [`DomainEvent::ContinuousAcquisitionSampleAcquired`]
    ContinuousAcquisitionSampleAcquired,
    /// [`DomainEvent::ContinuousAcquisitionFailed`]
    ContinuousAcquisitionFailed,
    /// [`DomainEvent::ContinuousAcquisitionStopped`]
    ContinuousAcquisitionStopped,
}

impl EventType {
    /// Every scan lifecycle event.
    pub const SCAN: [EventType; 8] = [
        EventType::ScanStarted,
        EventType::FlyScanStarted,
        EventType::ScanPointAcquired,
        EventType::ScanCompleted,
        EventType::ScanFailed,
        EventType::ScanCancelled,
        EventType::ScanPaused,
        EventType::ScanResumed,
    ];

    /// Every continuous acquisition event.
    pub const CONTINUOUS: [EventType; 3] = [
        EventType::ContinuousAcquisitionSampleAcquired,
        EventType::ContinuousAcquisitionFailed,
        EventType::ContinuousAcquisitionStopped,
    ];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something that happened in the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A scan entered RUNNING.
    ScanStarted {
        /// Scan identifier
        scan_id: Uuid,
        /// Configuration being executed
        config: StepScanConfig,
    },
    /// A fly scan entered RUNNING.
    FlyScanStarted {
        /// Scan identifier
        scan_id: Uuid,
        /// Configuration being executed
        config: FlyScanConfig,
        /// Samples the plan predicts
        expected_points: usize,
    },
    /// A point was measured and recorded.
    ///
    /// Fly scans number their samples in acquisition order.
    ScanPointAcquired {
        /// Scan identifier
        scan_id: Uuid,
        /// Index of the point in the trajectory
        point_index: usize,
        /// Where it was measured
        position: Position2D,
        /// Averaged measurement
        measurement: Measurement,
    },
    /// Every point was acquired.
    ScanCompleted {
        /// Scan identifier
        scan_id: Uuid,
        /// Number of points acquired
        total_points: usize,
    },
    /// The scan stopped on an error.
    ScanFailed {
        /// Scan identifier
        scan_id: Uuid,
        /// Error description
        reason: String,
    },
    /// The scan was cancelled.
    ScanCancelled {
        /// Scan identifier
        scan_id: Uuid,
        /// Points acquired before cancellation
        points_acquired: usize,
    },
    /// The scan suspended at a safe point.
    ScanPaused {
        /// Scan identifier
        scan_id: Uuid,
        /// Next point to acquire
        current_point_index: usize,
    },
    /// The scan left PAUSED.
    ScanResumed {
        /// Scan identifier
        scan_id: Uuid,
        /// Point the scan continues from
        resume_from_point_index: usize,
    },
    /// One continuous sample.
    ContinuousAcquisitionSampleAcquired {
        /// Acquisition run identifier
        acquisition_id: Uuid,
        /// Strictly increasing from 0 within a run
        sample_index: u64,
        /// Raw sample
        sample: Measurement,
    },
    /// The continuous loop hit an error.
    ContinuousAcquisitionFailed {
        /// Acquisition run identifier
        acquisition_id: Uuid,
        /// Error description
        reason: String,
    },
    /// The continuous loop exited.
    ContinuousAcquisitionStopped {
        /// Acquisition run identifier
        acquisition_id: Uuid,
        /// Samples published during the run
        samples_acquired: u64,
    },
}

impl DomainEvent {
    /// Subscription key of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::ScanStarted { .. } => EventType::ScanStarted,
            DomainEvent::FlyScanStarted { .. } => EventType::FlyScanStarted,
            DomainEvent::ScanPointAcquired { .. } => EventType::ScanPointAcquired,
            DomainEvent::ScanCompleted { .. } => EventType::ScanCompleted,
            DomainEvent::ScanFailed { .. } => EventType::ScanFailed,
            DomainEvent::ScanCancelled { .. } => EventType::ScanCancelled,
            DomainEvent::ScanPaused { .. } => EventType::ScanPaused,
            DomainEvent::ScanResumed { .. } => EventType::ScanResumed,
            DomainEvent::ContinuousAcquisitionSampleAcquired { .. } => {
                EventType::ContinuousAcquisitionSampleAcquired
            }
            DomainEvent::ContinuousAcquisitionFailed { .. } => EventType::ContinuousAcquisitionFailed,
            DomainEvent::ContinuousAcquisitionStopped { .. } => {
                EventType::ContinuousAcquisitionStopped
            }
        }
    }

    /// Scan this event belongs to, if it is a scan event.
    pub fn scan_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::ScanStarted { scan_id, .. }
            | DomainEvent::FlyScanStarted { scan_id, .. }
            | DomainEvent::ScanPointAcquired { scan_id, .. }
            | DomainEvent::ScanCompleted { scan_id, .. }
            | DomainEvent::ScanFailed { scan_id, .. }
            | DomainEvent::ScanCancelled { scan_id, .. }
            | DomainEvent::ScanPaused { scan_id, .. }
            | DomainEvent::ScanResumed { scan_id, .. } => Some(*scan_id),
            _ => None,
        }
    }
}
