//! Mock two-axis motion stage.

use super::{ErrorConfig, MockMode};
use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::{Axis, MotionId, MotionPort};
use crate::scan::{MotionProfile, Position2D, PHYSICAL_MAX_MM};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Limit behavior when a target exceeds the travel range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitBehavior {
    /// Hard stop - return error at limit
    HardStop,
    /// Clamp to limit - move to boundary without error
    Clamp,
}

/// Travel range `[0, max]` on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLimits {
    /// X travel (mm)
    pub max_x: f64,
    /// Y travel (mm)
    pub max_y: f64,
    /// What to do with out-of-range targets
    pub behavior: LimitBehavior,
}

impl StageLimits {
    /// Create limits with HardStop behavior
    pub fn hard_stop(max_x: f64, max_y: f64) -> Self {
        Self {
            max_x,
            max_y,
            behavior: LimitBehavior::HardStop,
        }
    }

    /// Create limits with Clamp behavior
    pub fn clamp(max_x: f64, max_y: f64) -> Self {
        Self {
            max_x,
            max_y,
            behavior: LimitBehavior::Clamp,
        }
    }

    fn enforce(&self, target: Position2D) -> AppResult<Position2D> {
        let inside = (0.0..=self.max_x).contains(&target.x) && (0.0..=self.max_y).contains(&target.y);
        match self.behavior {
            LimitBehavior::Clamp => Ok(Position2D::new(
                target.x.clamp(0.0, self.max_x),
                target.y.clamp(0.0, self.max_y),
            )),
            LimitBehavior::HardStop if inside => Ok(target),
            LimitBehavior::HardStop => Err(ScanError::Motion(format!(
                "Target {} exceeds limits [0, {:.2}] x [0, {:.2}] mm",
                target, self.max_x, self.max_y
            ))),
        }
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self::hard_stop(PHYSICAL_MAX_MM, PHYSICAL_MAX_MM)
    }
}

#[derive(Debug)]
struct StageState {
    position: Position2D,
    /// Target of the move in progress
    target: Option<Position2D>,
    speed_mm_s: Option<f64>,
    is_homed: bool,
    history: Vec<Position2D>,
}

/// Mock motion stage.
///
/// `move_to` records the target and returns immediately; the stage arrives
/// when `wait_until_stopped` is awaited. In [`MockMode::Realistic`] the wait
/// lasts as long as the trapezoidal profile predicts.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockMotionStage::builder()
///     .limits(StageLimits::hard_stop(100.0, 100.0))
///     .mode(MockMode::Realistic)
///     .build();
///
/// stage.move_to(Position2D::new(10.0, 5.0)).await?;
/// stage.wait_until_stopped().await?;
/// ```
#[derive(Clone)]
pub struct MockMotionStage {
    state: Arc<Mutex<StageState>>,
    limits: StageLimits,
    profile: MotionProfile,
    mode: MockMode,
    error_config: ErrorConfig,
    move_counter: Arc<AtomicU64>,
}

impl MockMotionStage {
    /// Instant stage at the origin with the default travel range.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring MockMotionStage
    pub fn builder() -> MockMotionStageBuilder {
        MockMotionStageBuilder::default()
    }

    /// Number of moves commanded so far.
    pub fn move_count(&self) -> u64 {
        self.move_counter.load(Ordering::SeqCst)
    }

    /// Targets of every accepted move, in order.
    pub fn move_history(&self) -> Vec<Position2D> {
        self.state.lock().history.clone()
    }

    /// Whether the stage has been homed.
    pub fn is_homed(&self) -> bool {
        self.state.lock().is_homed
    }

    /// Speed set through [`MotionPort::set_speed`].
    pub fn speed(&self) -> Option<f64> {
        self.state.lock().speed_mm_s
    }

    fn travel_time(&self, distance: f64, speed: Option<f64>) -> Duration {
        match self.mode {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic => {
                let profile = speed
                    .and_then(|v| {
                        MotionProfile::new(
                            self.profile.min_speed().min(v),
                            v,
                            self.profile.acceleration(),
                            self.profile.deceleration(),
                        )
                        .ok()
                    })
                    .unwrap_or(self.profile);
                Duration::try_from_secs_f64(profile.estimate_duration(distance))
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

impl Default for MockMotionStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionPort for MockMotionStage {
    async fn move_to(&self, position: Position2D) -> AppResult<MotionId> {
        self.error_config.check_operation("move_to", ScanError::Motion)?;
        let target = self.limits.enforce(position)?;

        let mut state = self.state.lock();
        tracing::debug!("MockMotionStage: Moving from {} to {}", state.position, target);
        state.target = Some(target);
        state.history.push(target);
        drop(state);

        let n = self.move_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-move-{n}"))
    }

    async fn get_current_position(&self) -> AppResult<Position2D> {
        self.error_config
            .check_operation("get_current_position", ScanError::Motion)?;
        Ok(self.state.lock().position)
    }

    async fn is_moving(&self) -> AppResult<bool> {
        Ok(self.state.lock().target.is_some())
    }

    async fn wait_until_stopped(&self) -> AppResult<()> {
        self.error_config
            .check_operation("wait_until_stopped", ScanError::Motion)?;
        if self.error_config.is_stalled("wait_until_stopped") {
            tracing::debug!("MockMotionStage: Stalled");
            std::future::pending::<()>().await;
        }

        let (target, distance, speed) = {
            let state = self.state.lock();
            match state.target {
                Some(target) => (target, state.position.distance_to(&target), state.speed_mm_s),
                None => return Ok(()),
            }
        };

        let duration = self.travel_time(distance, speed);
        if !duration.is_zero() {
            sleep(duration).await;
        }

        let mut state = self.state.lock();
        // a stop() during the sleep leaves the stage where it was
        if state.target == Some(target) {
            state.position = target;
            state.target = None;
            tracing::debug!("MockMotionStage: Reached {}", target);
        }
        Ok(())
    }

    async fn set_speed(&self, speed_mm_s: f64) -> AppResult<()> {
        if !speed_mm_s.is_finite() || speed_mm_s <= 0.0 {
            return Err(ScanError::Motion(format!(
                "Speed must be > 0 mm/s, got {speed_mm_s}"
            )));
        }
        self.state.lock().speed_mm_s = Some(speed_mm_s);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.state.lock().target = None;
        tracing::debug!("MockMotionStage: Stop");
        Ok(())
    }

    async fn emergency_stop(&self) -> AppResult<()> {
        self.state.lock().target = None;
        tracing::warn!("MockMotionStage: Emergency stop");
        Ok(())
    }

    async fn home(&self, axis: Option<Axis>) -> AppResult<()> {
        self.error_config.check_operation("home", ScanError::Motion)?;
        if self.mode == MockMode::Realistic {
            sleep(Duration::from_millis(100)).await;
        }
        let mut state = self.state.lock();
        match axis {
            Some(Axis::X) => state.position.x = 0.0,
            Some(Axis::Y) => state.position.y = 0.0,
            None => state.position = Position2D::default(),
        }
        state.target = None;
        state.is_homed = true;
        Ok(())
    }

    async fn set_reference(&self, axis: Axis, position: f64) -> AppResult<()> {
        let mut state = self.state.lock();
        match axis {
            Axis::X => state.position.x = position,
            Axis::Y => state.position.y = position,
        }
        Ok(())
    }

    async fn get_axis_limits(&self) -> AppResult<(f64, f64)> {
        Ok((self.limits.max_x, self.limits.max_y))
    }
}

/// Builder for [`MockMotionStage`].
#[derive(Debug, Clone, Default)]
pub struct MockMotionStageBuilder {
    initial_position: Position2D,
    limits: Option<StageLimits>,
    profile: Option<MotionProfile>,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockMotionStageBuilder {
    /// Starting position.
    pub fn initial_position(mut self, position: Position2D) -> Self {
        self.initial_position = position;
        self
    }

    /// Travel range.
    pub fn limits(mut self, limits: StageLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Ramp used for realistic timing.
    pub fn profile(mut self, profile: MotionProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Timing mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Error injection.
    pub fn error_config(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = error_config;
        self
    }

    /// Build the stage.
    pub fn build(self) -> MockMotionStage {
        MockMotionStage {
            state: Arc::new(Mutex::new(StageState {
                position: self.initial_position,
                target: None,
                speed_mm_s: None,
                is_homed: false,
                history: Vec::new(),
            })),
            limits: self.limits.unwrap_or_default(),
            profile: self.profile.unwrap_or_else(MotionProfile::default_fast),
            mode: self.mode,
            error_config: self.error_config,
            move_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}
