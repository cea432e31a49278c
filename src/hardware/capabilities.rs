//! Hardware ports used by the scan engine.
//!
//! The engine never talks to a device directly. It drives two narrow
//! capability traits, and the composition root decides which implementation
//! sits behind them (the mocks in [`mock`](super::mock) for tests and the
//! CLI, vendor adapters elsewhere).
//!
//! # Design Philosophy
//!
//! Each port:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Reports failures as [`ScanError::Motion`](crate::error::ScanError::Motion)
//!   or [`ScanError::Acquisition`](crate::error::ScanError::Acquisition)
//!
//! # Example
//!
//! ```rust,ignore
//! async fn visit(stage: &dyn MotionPort, target: Position2D) -> AppResult<()> {
//!     stage.move_to(target).await?;
//!     stage.wait_until_stopped().await
//! }
//! ```

use crate::error::AppResult;
use crate::scan::{Measurement, MeasurementUncertainty, Position2D};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the motion port assigns to a commanded move.
pub type MotionId = String;

/// Stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal axis
    X,
    /// Vertical axis
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Port: two-axis motion stage.
///
/// # Contract
/// - Positions are in millimetres
/// - `move_to` initiates motion and may return before the stage arrives
/// - `wait_until_stopped` resolves once the stage is at rest
/// - `get_current_position` may be approximate while moving
///
/// # Thread Safety
/// - All methods take `&self`; implementations use interior mutability
#[async_trait]
pub trait MotionPort: Send + Sync {
    /// Start an absolute move.
    ///
    /// # Returns
    /// - Ok(id) once the move is commanded
    /// - Err if the target is outside the travel range or the stage faulted
    async fn move_to(&self, position: Position2D) -> AppResult<MotionId>;

    /// Current stage position.
    async fn get_current_position(&self) -> AppResult<Position2D>;

    /// Whether a move is in progress.
    async fn is_moving(&self) -> AppResult<bool>;

    /// Resolve when the stage is at rest.
    async fn wait_until_stopped(&self) -> AppResult<()>;

    /// Set cruise speed (mm/s) for subsequent moves.
    async fn set_speed(&self, speed_mm_s: f64) -> AppResult<()>;

    /// Decelerate to a controlled stop.
    async fn stop(&self) -> AppResult<()>;

    /// Halt immediately.
    async fn emergency_stop(&self) -> AppResult<()>;

    /// Home one axis, or both when `axis` is `None`.
    async fn home(&self, axis: Option<Axis>) -> AppResult<()>;

    /// Redefine the current position of `axis` as `position`.
    async fn set_reference(&self, axis: Axis, position: f64) -> AppResult<()>;

    /// Travel limits `(max_x, max_y)` in millimetres.
    async fn get_axis_limits(&self) -> AppResult<(f64, f64)>;
}

/// Port: multi-channel lock-in acquisition.
#[async_trait]
pub trait AcquisitionPort: Send + Sync {
    /// Take one raw sample.
    async fn acquire_sample(&self) -> AppResult<Measurement>;

    /// Whether the device is ready to sample.
    async fn is_ready(&self) -> AppResult<bool>;

    /// Noise floor of the digitizer (V).
    fn get_quantification_noise(&self) -> f64;

    /// Adjust range and time constants for an uncertainty target.
    async fn configure_for_uncertainty(&self, target: MeasurementUncertainty) -> AppResult<()>;
}
