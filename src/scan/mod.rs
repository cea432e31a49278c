//! Scan domain: value objects, motion planning and the scan aggregates.
//!
//! Nothing in this module touches hardware or the runtime. The
//! [`experiment`](crate::experiment) layer drives these types through the
//! hardware ports.

pub mod config;
pub mod fly_scan;
pub mod measurement;
pub mod motion;
pub mod step_scan;
pub mod trajectory;

pub use config::{
    ContinuousAcquisitionConfig, MeasurementUncertainty, Position2D, ScanPattern, ScanZone,
    StepScanConfig, StepScanConfigBuilder, PHYSICAL_MAX_MM,
};
pub use fly_scan::{
    AcquisitionRateCapability, FlyScan, FlyScanConfig, FlyScanConfigBuilder, FlyScanValidation,
    MAX_FLY_RATE_HZ,
};
pub use measurement::{aggregate, Channel, Measurement, MeasurementStatistics, CHANNEL_COUNT};
pub use motion::{AtomicMotion, MotionPhases, MotionProfile, MotionProfileSelector, MotionState};
pub use step_scan::{ScanOperation, ScanPointResult, ScanProgress, ScanStatus, StepScan};
pub use trajectory::{ScanTrajectory, ScanTrajectoryFactory};
