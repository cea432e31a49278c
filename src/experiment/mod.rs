//! Execution layer: the scan orchestrator (step and fly scans), the
//! acquisition rate meter and the continuous acquisition executor.

pub mod continuous;
pub mod rate_measurement;
pub mod scan_service;

pub use continuous::{ContinuousAcquisitionExecutor, DEFAULT_STOP_TIMEOUT};
pub use rate_measurement::AcquisitionRateMeter;
pub use scan_service::{
    ScanApplicationService, ScanControl, ScanServiceSettings, ScanStatusSnapshot,
};
