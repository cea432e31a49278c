//! Motion profiles and atomic motion segments.
//!
//! A [`MotionProfile`] describes a trapezoidal velocity ramp: the stage leaves
//! at `min_speed`, accelerates to `target_speed`, cruises, then decelerates
//! back to `min_speed`. When the move is too short to reach the target speed
//! the ramp degenerates into a triangle with a lower peak.
//!
//! ```text
//!  v
//!  │      ┌────────────┐  target_speed
//!  │     /              \
//!  │    /                \
//!  │───┘                  └──  min_speed
//!  └──────────────────────────── t
//!     accel   cruise    decel
//! ```

use super::config::Position2D;
use crate::error::{AppResult, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Velocity ramp parameters (mm/s and mm/s²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMotionProfile")]
pub struct MotionProfile {
    min_speed: f64,
    target_speed: f64,
    acceleration: f64,
    deceleration: f64,
}

#[derive(Deserialize)]
struct RawMotionProfile {
    min_speed: f64,
    target_speed: f64,
    acceleration: f64,
    deceleration: f64,
}

impl TryFrom<RawMotionProfile> for MotionProfile {
    type Error = ScanError;

    fn try_from(raw: RawMotionProfile) -> Result<Self, Self::Error> {
        MotionProfile::new(
            raw.min_speed,
            raw.target_speed,
            raw.acceleration,
            raw.deceleration,
        )
    }
}

/// Durations of the three ramp phases for a given distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionPhases {
    /// Time spent accelerating (s).
    pub accel_time: f64,
    /// Time spent at peak speed (s). Zero for triangular ramps.
    pub cruise_time: f64,
    /// Time spent decelerating (s).
    pub decel_time: f64,
    /// Highest speed reached (mm/s).
    pub peak_speed: f64,
}

impl MotionPhases {
    /// Total move time (s).
    pub fn total(&self) -> f64 {
        self.accel_time + self.cruise_time + self.decel_time
    }
}

impl MotionProfile {
    /// Create a profile.
    ///
    /// All values must be finite and non-negative, accelerations strictly
    /// positive, `target_speed > 0` and `min_speed <= target_speed`.
    pub fn new(
        min_speed: f64,
        target_speed: f64,
        acceleration: f64,
        deceleration: f64,
    ) -> AppResult<Self> {
        let values = [
            ("min_speed", min_speed),
            ("target_speed", target_speed),
            ("acceleration", acceleration),
            ("deceleration", deceleration),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(ScanError::Configuration(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        if acceleration == 0.0 || deceleration == 0.0 {
            return Err(ScanError::Configuration(
                "acceleration and deceleration must be > 0".to_string(),
            ));
        }
        if target_speed == 0.0 {
            return Err(ScanError::Configuration(
                "target_speed must be > 0".to_string(),
            ));
        }
        if min_speed > target_speed {
            return Err(ScanError::Configuration(format!(
                "min_speed ({min_speed}) must not exceed target_speed ({target_speed})"
            )));
        }

        Ok(Self {
            min_speed,
            target_speed,
            acceleration,
            deceleration,
        })
    }

    /// Slow profile used for short hops.
    pub fn default_slow() -> Self {
        Self {
            min_speed: 0.1,
            target_speed: 1.0,
            acceleration: 0.5,
            deceleration: 0.5,
        }
    }

    /// Fast profile used for long moves.
    pub fn default_fast() -> Self {
        Self {
            min_speed: 0.5,
            target_speed: 10.0,
            acceleration: 5.0,
            deceleration: 5.0,
        }
    }

    /// Start/stop speed (mm/s).
    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    /// Cruise speed (mm/s).
    pub fn target_speed(&self) -> f64 {
        self.target_speed
    }

    /// Acceleration (mm/s²).
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Deceleration (mm/s²).
    pub fn deceleration(&self) -> f64 {
        self.deceleration
    }

    /// Split a move of `distance` mm into ramp phases.
    pub fn phases(&self, distance: f64) -> MotionPhases {
        let v0 = self.min_speed;
        let v1 = self.target_speed;
        let a = self.acceleration;
        let b = self.deceleration;
        let distance = distance.abs();

        let accel_dist = (v1 * v1 - v0 * v0) / (2.0 * a);
        let decel_dist = (v1 * v1 - v0 * v0) / (2.0 * b);

        if accel_dist + decel_dist <= distance {
            MotionPhases {
                accel_time: (v1 - v0) / a,
                cruise_time: (distance - accel_dist - decel_dist) / v1,
                decel_time: (v1 - v0) / b,
                peak_speed: v1,
            }
        } else {
            // Triangular: peak speed where accel and decel distances meet.
            let numerator = distance + v0 * v0 / (2.0 * a) + v0 * v0 / (2.0 * b);
            let denominator = 1.0 / (2.0 * a) + 1.0 / (2.0 * b);
            let peak = (numerator / denominator).sqrt();
            MotionPhases {
                accel_time: (peak - v0) / a,
                cruise_time: 0.0,
                decel_time: (peak - v0) / b,
                peak_speed: peak,
            }
        }
    }

    /// Estimated time (s) to travel `distance` mm.
    pub fn estimate_duration(&self, distance: f64) -> f64 {
        self.phases(distance).total()
    }

    /// Speed (mm/s) `t` seconds into a move of `distance` mm.
    ///
    /// Returns 0 outside `[0, duration]`.
    pub fn velocity_at(&self, distance: f64, t: f64) -> f64 {
        let p = self.phases(distance);
        if t < 0.0 || t > p.total() {
            return 0.0;
        }
        if t < p.accel_time {
            self.min_speed + self.acceleration * t
        } else if t < p.accel_time + p.cruise_time {
            p.peak_speed
        } else {
            let tau = t - p.accel_time - p.cruise_time;
            (p.peak_speed - self.deceleration * tau).max(self.min_speed)
        }
    }

    /// Distance (mm) covered `t` seconds into a move of `distance` mm.
    pub fn distance_at(&self, distance: f64, t: f64) -> f64 {
        let distance = distance.abs();
        let p = self.phases(distance);
        if t <= 0.0 {
            return 0.0;
        }
        if t >= p.total() {
            return distance;
        }
        let v0 = self.min_speed;
        let accel_dist = (p.peak_speed * p.peak_speed - v0 * v0) / (2.0 * self.acceleration);
        let covered = if t < p.accel_time {
            v0 * t + 0.5 * self.acceleration * t * t
        } else if t < p.accel_time + p.cruise_time {
            accel_dist + p.peak_speed * (t - p.accel_time)
        } else {
            let tau = t - p.accel_time - p.cruise_time;
            accel_dist + p.peak_speed * p.cruise_time + p.peak_speed * tau
                - 0.5 * self.deceleration * tau * tau
        };
        covered.clamp(0.0, distance)
    }
}

/// Picks a motion profile from the length of the move.
///
/// Moves strictly shorter than the threshold use the slow profile; the
/// threshold itself and anything longer use the fast profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionProfileSelector {
    slow: MotionProfile,
    fast: MotionProfile,
    small_distance_threshold_mm: f64,
}

impl Default for MotionProfileSelector {
    fn default() -> Self {
        Self {
            slow: MotionProfile::default_slow(),
            fast: MotionProfile::default_fast(),
            small_distance_threshold_mm: 5.0,
        }
    }
}

impl MotionProfileSelector {
    /// Create a selector.
    pub fn new(
        slow: MotionProfile,
        fast: MotionProfile,
        small_distance_threshold_mm: f64,
    ) -> AppResult<Self> {
        if !small_distance_threshold_mm.is_finite() || small_distance_threshold_mm < 0.0 {
            return Err(ScanError::Configuration(format!(
                "small_distance_threshold_mm must be finite and >= 0, got {small_distance_threshold_mm}"
            )));
        }
        Ok(Self {
            slow,
            fast,
            small_distance_threshold_mm,
        })
    }

    /// Profile for a move of `distance_mm`.
    pub fn select_for_distance(&self, distance_mm: f64) -> MotionProfile {
        if distance_mm < self.small_distance_threshold_mm {
            self.slow
        } else {
            self.fast
        }
    }

    /// Threshold separating slow and fast moves (mm).
    pub fn threshold_mm(&self) -> f64 {
        self.small_distance_threshold_mm
    }
}

/// Lifecycle of an [`AtomicMotion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    /// Planned, not yet commanded.
    Pending,
    /// Commanded to the stage.
    Executing,
    /// Stage reported arrival.
    Completed,
    /// Move failed or was aborted.
    Failed,
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionState::Pending => write!(f, "PENDING"),
            MotionState::Executing => write!(f, "EXECUTING"),
            MotionState::Completed => write!(f, "COMPLETED"),
            MotionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// One planned move between two consecutive trajectory points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtomicMotion {
    id: Uuid,
    dx: f64,
    dy: f64,
    motion_profile: MotionProfile,
    estimated_duration_seconds: f64,
    execution_state: MotionState,
    execution_motion_id: Option<String>,
    actual_duration: Option<Duration>,
    failure_reason: Option<String>,
}

impl AtomicMotion {
    /// Plan a relative move of `(dx, dy)` mm with `profile`.
    pub fn new(dx: f64, dy: f64, profile: MotionProfile) -> AppResult<Self> {
        if !dx.is_finite() || !dy.is_finite() {
            return Err(ScanError::Configuration(format!(
                "Motion displacement must be finite, got ({dx}, {dy})"
            )));
        }
        let distance = dx.hypot(dy);
        Ok(Self {
            id: Uuid::new_v4(),
            dx,
            dy,
            motion_profile: profile,
            estimated_duration_seconds: profile.estimate_duration(distance),
            execution_state: MotionState::Pending,
            execution_motion_id: None,
            actual_duration: None,
            failure_reason: None,
        })
    }

    /// Motion identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Displacement along x (mm).
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Displacement along y (mm).
    pub fn dy(&self) -> f64 {
        self.dy
    }

    /// Straight-line length (mm).
    pub fn distance(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    /// Profile chosen for this move.
    pub fn motion_profile(&self) -> &MotionProfile {
        &self.motion_profile
    }

    /// Planned duration (s).
    pub fn estimated_duration_seconds(&self) -> f64 {
        self.estimated_duration_seconds
    }

    /// Current lifecycle state.
    pub fn execution_state(&self) -> MotionState {
        self.execution_state
    }

    /// Identifier returned by the motion port when the move was commanded.
    pub fn execution_motion_id(&self) -> Option<&str> {
        self.execution_motion_id.as_deref()
    }

    /// Measured duration once completed.
    pub fn actual_duration(&self) -> Option<Duration> {
        self.actual_duration
    }

    /// Reason recorded by [`fail`](Self::fail).
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// PENDING -> EXECUTING.
    pub fn start(&mut self, motion_id: impl Into<String>) -> AppResult<()> {
        if self.execution_state != MotionState::Pending {
            return Err(self.refuse("start"));
        }
        self.execution_state = MotionState::Executing;
        self.execution_motion_id = Some(motion_id.into());
        Ok(())
    }

    /// EXECUTING -> COMPLETED.
    pub fn complete(&mut self, actual: Duration) -> AppResult<()> {
        if self.execution_state != MotionState::Executing {
            return Err(self.refuse("complete"));
        }
        self.execution_state = MotionState::Completed;
        self.actual_duration = Some(actual);
        Ok(())
    }

    /// PENDING | EXECUTING -> FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) -> AppResult<()> {
        match self.execution_state {
            MotionState::Pending | MotionState::Executing => {
                self.execution_state = MotionState::Failed;
                self.failure_reason = Some(reason.into());
                Ok(())
            }
            _ => Err(self.refuse("fail")),
        }
    }

    /// Planned speed `t` seconds after the move starts.
    pub fn velocity_at(&self, t: f64) -> f64 {
        self.motion_profile.velocity_at(self.distance(), t)
    }

    /// Samples taken at `sample_rate_hz` over the planned duration, the one
    /// at `t = 0` included. Zero for a non-positive or non-finite rate.
    pub fn sample_count(&self, sample_rate_hz: f64) -> usize {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return 0;
        }
        // float to int casts saturate
        ((self.estimated_duration_seconds * sample_rate_hz).floor() as usize).saturating_add(1)
    }

    /// Predicted positions of samples taken at `sample_rate_hz` during the
    /// move, starting at `start`. The first sample is at `t = 0`.
    pub fn sample_positions(&self, start: Position2D, sample_rate_hz: f64) -> Vec<Position2D> {
        let count = self.sample_count(sample_rate_hz);
        let distance = self.distance();
        (0..count)
            .map(|k| {
                let t = k as f64 / sample_rate_hz;
                let covered = self.motion_profile.distance_at(distance, t);
                let ratio = if distance > 0.0 { covered / distance } else { 0.0 };
                Position2D::new(start.x + self.dx * ratio, start.y + self.dy * ratio)
            })
            .collect()
    }

    fn refuse(&self, operation: &'static str) -> ScanError {
        ScanError::MotionTransition {
            current: self.execution_state,
            operation,
        }
    }
}
