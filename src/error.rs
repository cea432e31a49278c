//! Error taxonomy for the scan engine.
//!
//! `ScanError` is the single error type returned by value-object constructors,
//! the hardware ports and the state machines. It is built with `thiserror` so
//! underlying failures convert through `?` where a source type exists.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: figment failed to load or deserialize a configuration source.
//! - **`Configuration`**: a value parsed but is semantically invalid (negative
//!   point count, inverted zone bounds, zero sample rate). Raised synchronously
//!   at construction time, never clamped.
//! - **`Motion`**: the motion port reported a failure (stage fault, limit,
//!   timeout waiting for the stage to settle).
//! - **`Acquisition`**: the acquisition port reported a failure.
//! - **`StateTransition`**: an operation was attempted on a [`StepScan`] in a
//!   state that does not allow it.
//! - **`MotionTransition`**: the same for an [`AtomicMotion`].
//!
//! [`StepScan`]: crate::scan::StepScan
//! [`AtomicMotion`]: crate::scan::AtomicMotion

use crate::scan::{MotionState, ScanOperation, ScanStatus};
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Errors raised by the scan engine.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Configuration source could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration value is invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Motion hardware failure.
    #[error("Motion error: {0}")]
    Motion(String),

    /// Acquisition hardware failure.
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// Illegal scan lifecycle transition.
    #[error("Cannot {operation} scan in state {current}")]
    StateTransition {
        /// State the scan was in.
        current: ScanStatus,
        /// Operation that was refused.
        operation: ScanOperation,
    },

    /// Illegal motion lifecycle transition.
    #[error("Cannot {operation} motion in state {current}")]
    MotionTransition {
        /// State the motion was in.
        current: MotionState,
        /// Operation that was refused.
        operation: &'static str,
    },
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}
