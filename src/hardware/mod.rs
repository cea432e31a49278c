//! Hardware ports and mock implementations.

pub mod capabilities;
pub mod mock;

pub use capabilities::{AcquisitionPort, Axis, MotionId, MotionPort};
