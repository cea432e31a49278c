//! The step-scan aggregate and its lifecycle.

use super::config::{Position2D, StepScanConfig};
use super::measurement::Measurement;
use super::motion::AtomicMotion;
use super::trajectory::ScanTrajectory;
use crate::error::{AppResult, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Scan lifecycle state.
///
/// # State Machine
///
/// ```text
/// Pending ──start──> Running ──complete──> Completed
///                    │   ▲
///               pause│   │resume
///                    ▼   │
///                   Paused
///
/// Running | Paused ──fail──> Failed
/// any non-final    ──cancel──> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    /// Created, not started
    Pending,
    /// Visiting points
    Running,
    /// Suspended at a safe point
    Paused,
    /// Every point acquired
    Completed,
    /// Aborted by an error
    Failed,
    /// Aborted by the user
    Cancelled,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Pending => write!(f, "PENDING"),
            ScanStatus::Running => write!(f, "RUNNING"),
            ScanStatus::Paused => write!(f, "PAUSED"),
            ScanStatus::Completed => write!(f, "COMPLETED"),
            ScanStatus::Failed => write!(f, "FAILED"),
            ScanStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl ScanStatus {
    /// Whether no further transition is possible.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    /// Whether the scan is active (running or paused).
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Running | ScanStatus::Paused)
    }
}

/// Operations on a [`StepScan`], used in transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOperation {
    /// `start()`
    Start,
    /// `pause()`
    Pause,
    /// `resume()`
    Resume,
    /// `complete()`
    Complete,
    /// `fail()`
    Fail,
    /// `cancel()`
    Cancel,
    /// `add_result()`
    AddResult,
}

impl fmt::Display for ScanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanOperation::Start => "start",
            ScanOperation::Pause => "pause",
            ScanOperation::Resume => "resume",
            ScanOperation::Complete => "complete",
            ScanOperation::Fail => "fail",
            ScanOperation::Cancel => "cancel",
            ScanOperation::AddResult => "add result to",
        };
        f.write_str(name)
    }
}

/// Measurement recorded at one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPointResult {
    /// Where the measurement was taken.
    pub position: Position2D,
    /// Averaged measurement.
    pub measurement: Measurement,
    /// Index of the point in the trajectory.
    pub point_index: usize,
}

/// Progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanProgress {
    /// Points acquired so far.
    pub current: usize,
    /// Points in the trajectory.
    pub total: usize,
    /// `current / total * 100`.
    pub percentage: f64,
}

/// Status, timestamps and failure reason shared by every scan aggregate.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Lifecycle {
    status: ScanStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            status: ScanStatus::Pending,
            start_time: None,
            end_time: None,
            failure_reason: None,
        }
    }

    pub(crate) fn status(&self) -> ScanStatus {
        self.status
    }

    pub(crate) fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub(crate) fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub(crate) fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub(crate) fn start(&mut self) -> AppResult<()> {
        self.require(ScanOperation::Start, |s| s == ScanStatus::Pending)?;
        self.status = ScanStatus::Running;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn pause(&mut self) -> AppResult<()> {
        self.require(ScanOperation::Pause, |s| s == ScanStatus::Running)?;
        self.status = ScanStatus::Paused;
        Ok(())
    }

    pub(crate) fn resume(&mut self) -> AppResult<()> {
        self.require(ScanOperation::Resume, |s| s == ScanStatus::Paused)?;
        self.status = ScanStatus::Running;
        Ok(())
    }

    pub(crate) fn complete(&mut self) -> AppResult<()> {
        self.require(ScanOperation::Complete, |s| s == ScanStatus::Running)?;
        self.finish(ScanStatus::Completed);
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: String) -> AppResult<()> {
        self.require(ScanOperation::Fail, |s| s.is_active())?;
        self.failure_reason = Some(reason);
        self.finish(ScanStatus::Failed);
        Ok(())
    }

    pub(crate) fn cancel(&mut self) -> AppResult<()> {
        self.require(ScanOperation::Cancel, |s| !s.is_final())?;
        self.finish(ScanStatus::Cancelled);
        Ok(())
    }

    pub(crate) fn require(
        &self,
        operation: ScanOperation,
        allowed: impl Fn(ScanStatus) -> bool,
    ) -> AppResult<()> {
        if allowed(self.status) {
            Ok(())
        } else {
            Err(ScanError::StateTransition {
                current: self.status,
                operation,
            })
        }
    }

    fn finish(&mut self, status: ScanStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

/// A step scan: configuration, plan, lifecycle and results.
///
/// All mutation goes through guarded transitions; an illegal transition
/// returns [`ScanError::StateTransition`] and leaves the scan untouched.
#[derive(Debug, Clone, Serialize)]
pub struct StepScan {
    id: Uuid,
    config: StepScanConfig,
    trajectory: ScanTrajectory,
    motions: Vec<AtomicMotion>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
    current_point_index: usize,
    results: Vec<ScanPointResult>,
}

impl StepScan {
    /// Create a pending scan.
    pub fn new(config: StepScanConfig, trajectory: ScanTrajectory, motions: Vec<AtomicMotion>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            trajectory,
            motions,
            lifecycle: Lifecycle::new(),
            current_point_index: 0,
            results: Vec::new(),
        }
    }

    /// Scan identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the scan was built from.
    pub fn config(&self) -> &StepScanConfig {
        &self.config
    }

    /// Planned points.
    pub fn trajectory(&self) -> &ScanTrajectory {
        &self.trajectory
    }

    /// Planned motions between points.
    pub fn motions(&self) -> &[AtomicMotion] {
        &self.motions
    }

    /// Current state.
    pub fn status(&self) -> ScanStatus {
        self.lifecycle.status()
    }

    /// Index of the next point to acquire.
    pub fn current_point_index(&self) -> usize {
        self.current_point_index
    }

    /// Results in acquisition order.
    pub fn results(&self) -> &[ScanPointResult] {
        &self.results
    }

    /// When the scan started.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.start_time()
    }

    /// When the scan reached a final state.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.end_time()
    }

    /// Reason passed to [`fail`](Self::fail).
    pub fn failure_reason(&self) -> Option<&str> {
        self.lifecycle.failure_reason()
    }

    /// Number of points in the trajectory.
    pub fn total_points(&self) -> usize {
        self.trajectory.len()
    }

    /// Next point to visit, if any remain.
    pub fn next_position(&self) -> Option<Position2D> {
        self.trajectory.get(self.current_point_index)
    }

    /// Progress counters.
    pub fn progress(&self) -> ScanProgress {
        let total = self.total_points();
        let percentage = if total == 0 {
            0.0
        } else {
            self.current_point_index as f64 / total as f64 * 100.0
        };
        ScanProgress {
            current: self.current_point_index,
            total,
            percentage,
        }
    }

    /// Motion that brings the stage from the previous point to `point_index`.
    /// The first point has none.
    pub fn motion_into_point_mut(&mut self, point_index: usize) -> Option<&mut AtomicMotion> {
        point_index
            .checked_sub(1)
            .and_then(move |i| self.motions.get_mut(i))
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self) -> AppResult<()> {
        self.lifecycle.start()
    }

    /// RUNNING -> PAUSED.
    pub fn pause(&mut self) -> AppResult<()> {
        self.lifecycle.pause()
    }

    /// PAUSED -> RUNNING.
    pub fn resume(&mut self) -> AppResult<()> {
        self.lifecycle.resume()
    }

    /// RUNNING -> COMPLETED.
    pub fn complete(&mut self) -> AppResult<()> {
        self.lifecycle.complete()
    }

    /// RUNNING | PAUSED -> FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) -> AppResult<()> {
        self.lifecycle.fail(reason.into())
    }

    /// Any non-final state -> CANCELLED.
    pub fn cancel(&mut self) -> AppResult<()> {
        self.lifecycle.cancel()
    }

    /// Record the measurement of the current point. Only while RUNNING.
    pub fn add_result(&mut self, result: ScanPointResult) -> AppResult<()> {
        self.lifecycle
            .require(ScanOperation::AddResult, |s| s == ScanStatus::Running)?;
        self.results.push(result);
        self.current_point_index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{MotionProfileSelector, ScanTrajectoryFactory, ScanZone};

    fn scan() -> StepScan {
        let zone = ScanZone::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let config = StepScanConfig::builder(zone).points(2, 2).build().unwrap();
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config);
        let motions = ScanTrajectoryFactory::create_motions(
            trajectory.points(),
            &MotionProfileSelector::default(),
        )
        .unwrap();
        StepScan::new(config, trajectory, motions)
    }

    fn result(index: usize) -> ScanPointResult {
        ScanPointResult {
            position: Position2D::default(),
            measurement: Measurement::raw([0.0; 6]),
            point_index: index,
        }
    }

    #[test]
    fn happy_path() {
        let mut scan = scan();
        scan.start().unwrap();
        assert!(scan.start_time().is_some());
        scan.add_result(result(0)).unwrap();
        scan.pause().unwrap();
        assert!(scan.add_result(result(1)).is_err());
        scan.resume().unwrap();
        scan.add_result(result(1)).unwrap();
        assert_eq!(scan.progress().percentage, 50.0);
        scan.complete().unwrap();
        assert_eq!(scan.status(), ScanStatus::Completed);
        assert!(scan.end_time().is_some());
    }

    #[test]
    fn illegal_transitions_are_errors() {
        let mut scan = scan();
        assert!(matches!(
            scan.pause(),
            Err(ScanError::StateTransition {
                current: ScanStatus::Pending,
                operation: ScanOperation::Pause
            })
        ));
        assert!(scan.complete().is_err());
        assert!(scan.fail("nope").is_err());
        scan.start().unwrap();
        assert!(scan.resume().is_err());
        assert!(scan.start().is_err());
    }

    #[test]
    fn final_states_are_absorbing() {
        let mut scan = scan();
        scan.start().unwrap();
        scan.fail("stage fault").unwrap();
        assert_eq!(scan.failure_reason(), Some("stage fault"));
        assert!(scan.cancel().is_err());
        assert!(scan.resume().is_err());
        assert_eq!(scan.status(), ScanStatus::Failed);
    }

    #[test]
    fn cancel_from_pending_and_paused() {
        let mut pending = scan();
        pending.cancel().unwrap();
        assert_eq!(pending.status(), ScanStatus::Cancelled);

        let mut paused = scan();
        paused.start().unwrap();
        paused.pause().unwrap();
        paused.cancel().unwrap();
        assert_eq!(paused.status(), ScanStatus::Cancelled);
    }

    #[test]
    fn motion_into_point() {
        let mut scan = scan();
        assert!(scan.motion_into_point_mut(0).is_none());
        assert!(scan.motion_into_point_mut(1).is_some());
        assert!(scan.motion_into_point_mut(3).is_some());
        assert!(scan.motion_into_point_mut(4).is_none());
    }
}
