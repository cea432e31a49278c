//! # Rust Scan Engine
//!
//! Step-scan execution and motion orchestration for spatial scanning
//! instruments: an XY stage carries a sample while a six-channel detector
//! (X/Y/Z, in-phase and quadrature) is read at every point of a grid, or
//! continuously while the stage flies over it.
//!
//! ## Crate Structure
//!
//! - **`scan`**: value objects and aggregates. Scan zones and patterns, the
//!   trapezoidal [`MotionProfile`](scan::MotionProfile), trajectory
//!   generation, the [`StepScan`](scan::StepScan) and
//!   [`FlyScan`](scan::FlyScan) lifecycles.
//! - **`hardware`**: the [`MotionPort`](hardware::MotionPort) and
//!   [`AcquisitionPort`](hardware::AcquisitionPort) capability traits, plus
//!   mock devices with error injection.
//! - **`experiment`**: the scan orchestrator, the acquisition rate meter and
//!   the continuous acquisition executor.
//! - **`events`**: domain events and the synchronous event bus.
//! - **`output`**: presentation sink fed from the bus.
//! - **`config`**: Figment-based layered configuration.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the [`ScanError`](error::ScanError) type.
//!
//! ## Quick start
//!
//! ```no_run
//! use rust_scan::events::EventBus;
//! use rust_scan::experiment::ScanApplicationService;
//! use rust_scan::hardware::mock::{MockAcquisitionDevice, MockMotionStage};
//! use rust_scan::scan::{ScanPattern, ScanZone, StepScanConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> rust_scan::error::AppResult<()> {
//! let bus = Arc::new(EventBus::new());
//! let service = ScanApplicationService::new(
//!     Arc::new(MockMotionStage::new()),
//!     Arc::new(MockAcquisitionDevice::new()),
//!     bus,
//! );
//! let config = StepScanConfig::builder(ScanZone::new(0.0, 10.0, 0.0, 10.0)?)
//!     .points(5, 5)
//!     .pattern(ScanPattern::Serpentine)
//!     .build()?;
//! assert!(service.execute_scan(config).await);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod output;
pub mod scan;

pub use error::{AppResult, ScanError};
