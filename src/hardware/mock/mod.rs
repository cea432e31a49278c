//! Mock hardware for tests and the command-line tool.
//!
//! Mocks operate in [`MockMode::Instant`] by default and accept an
//! [`ErrorConfig`] to script failures.

mod acquisition;
mod errors;
mod mode;
mod stage;

pub use acquisition::{MockAcquisitionDevice, MockAcquisitionDeviceBuilder};
pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use stage::{LimitBehavior, MockMotionStage, MockMotionStageBuilder, StageLimits};
