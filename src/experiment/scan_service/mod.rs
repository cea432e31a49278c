//! Scan orchestration.
//!
//! [`ScanApplicationService`] drives one [`StepScan`] through the hardware
//! ports: for every trajectory point it moves the stage, waits for it to
//! settle, acquires and averages samples, records the result and publishes
//! events. The loop owns the aggregate; other tasks interact only through
//! [`ScanControl`].
//!
//! # Safe points
//!
//! ```text
//! ┌─> cancel? ─> pause? ─> move_to ─> wait_until_stopped ─> stabilize ─> acquire ─> record ─┐
//! └─────────────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancellation is also raced against the motion wait, the stabilization
//! delay and each sample, so a stuck port cannot hold the scan hostage.
//!
//! Fly scans (see [`fly`]) share the busy flag, the control handle and the
//! status snapshot; only one scan of either kind runs at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = Arc::new(ScanApplicationService::new(stage, lockin, bus));
//! let handle = service.clone().spawn_scan(config);
//! service.pause_scan();
//! service.resume_scan();
//! let completed = handle.await?;
//! ```

use crate::error::{AppResult, ScanError};
use crate::events::{DomainEvent, EventBus};
use crate::hardware::{AcquisitionPort, MotionPort};
use crate::scan::{
    aggregate, FlyScan, Measurement, MotionProfileSelector, Position2D, ScanPointResult,
    ScanProgress, ScanStatus, ScanTrajectoryFactory, StepScan, StepScanConfig,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

mod fly;

/// Tunables of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanServiceSettings {
    /// Upper bound on `wait_until_stopped` per point.
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Acquisition attempts per point when the uncertainty target is missed.
    pub max_uncertainty_attempts: u32,
    /// Averaging multiplier between attempts.
    pub averaging_growth_factor: usize,
}

impl Default for ScanServiceSettings {
    fn default() -> Self {
        Self {
            move_timeout: Duration::from_secs(30),
            max_uncertainty_attempts: 3,
            averaging_growth_factor: 2,
        }
    }
}

/// Pause and cancel requests for the running scan.
///
/// Cloning shares the same flags. Requests never touch the [`StepScan`]; the
/// loop picks them up at its next safe point.
#[derive(Clone)]
pub struct ScanControl {
    cancel: Arc<Mutex<CancellationToken>>,
    pause: Arc<watch::Sender<bool>>,
}

impl Default for ScanControl {
    fn default() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            pause: Arc::new(pause),
        }
    }
}

impl std::fmt::Debug for ScanControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanControl")
            .field("cancel_requested", &self.is_cancel_requested())
            .field("pause_requested", &self.is_pause_requested())
            .finish()
    }
}

impl ScanControl {
    /// Ask the scan to suspend at its next safe point.
    pub fn request_pause(&self) {
        self.pause.send_replace(true);
    }

    /// Withdraw a pause request.
    pub fn request_resume(&self) {
        self.pause.send_replace(false);
    }

    /// Ask the scan to stop. Wakes a paused scan.
    pub fn request_cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether a cancel is pending.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    /// Whether a pause is pending.
    pub fn is_pause_requested(&self) -> bool {
        *self.pause.borrow()
    }

    /// Token for the current scan.
    pub fn token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    fn pause_receiver(&self) -> watch::Receiver<bool> {
        self.pause.subscribe()
    }

    /// Clear both flags before a new scan.
    fn reset(&self) {
        *self.cancel.lock() = CancellationToken::new();
        self.pause.send_replace(false);
    }
}

/// Point-in-time view of the scan for status displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStatusSnapshot {
    /// Scan identifier, `None` before the first scan
    pub scan_id: Option<Uuid>,
    /// Lifecycle state
    pub status: Option<ScanStatus>,
    /// RUNNING or PAUSED
    pub is_running: bool,
    /// PAUSED
    pub is_paused: bool,
    /// Next point to acquire
    pub current_point_index: usize,
    /// Points in the trajectory
    pub total_points: usize,
    /// Completion percentage
    pub progress_percentage: f64,
    /// Extrapolated from the time spent so far
    pub estimated_remaining_seconds: f64,
}

enum Flow {
    Continue,
    Cancel,
}

enum LoopOutcome {
    Completed,
    Cancelled,
}

/// What the loop needs from either scan aggregate.
trait ScanAggregate {
    fn id(&self) -> Uuid;
    fn status(&self) -> ScanStatus;
    fn progress(&self) -> ScanProgress;
    fn points_acquired(&self) -> usize;
    fn planned_duration(&self) -> Duration;
    fn pause(&mut self) -> AppResult<()>;
    fn resume(&mut self) -> AppResult<()>;
    fn complete(&mut self) -> AppResult<()>;
    fn cancel(&mut self) -> AppResult<()>;
    fn fail(&mut self, reason: &str) -> AppResult<()>;
}

impl ScanAggregate for StepScan {
    fn id(&self) -> Uuid {
        StepScan::id(self)
    }

    fn status(&self) -> ScanStatus {
        StepScan::status(self)
    }

    fn progress(&self) -> ScanProgress {
        StepScan::progress(self)
    }

    fn points_acquired(&self) -> usize {
        self.results().len()
    }

    fn planned_duration(&self) -> Duration {
        ScanTrajectoryFactory::estimate_scan_duration(self.config(), self.motions())
    }

    fn pause(&mut self) -> AppResult<()> {
        StepScan::pause(self)
    }

    fn resume(&mut self) -> AppResult<()> {
        StepScan::resume(self)
    }

    fn complete(&mut self) -> AppResult<()> {
        StepScan::complete(self)
    }

    fn cancel(&mut self) -> AppResult<()> {
        StepScan::cancel(self)
    }

    fn fail(&mut self, reason: &str) -> AppResult<()> {
        StepScan::fail(self, reason)
    }
}

impl ScanAggregate for FlyScan {
    fn id(&self) -> Uuid {
        FlyScan::id(self)
    }

    fn status(&self) -> ScanStatus {
        FlyScan::status(self)
    }

    fn progress(&self) -> ScanProgress {
        FlyScan::progress(self)
    }

    fn points_acquired(&self) -> usize {
        self.results().len()
    }

    fn planned_duration(&self) -> Duration {
        self.estimated_duration()
    }

    fn pause(&mut self) -> AppResult<()> {
        FlyScan::pause(self)
    }

    fn resume(&mut self) -> AppResult<()> {
        FlyScan::resume(self)
    }

    fn complete(&mut self) -> AppResult<()> {
        FlyScan::complete(self)
    }

    fn cancel(&mut self) -> AppResult<()> {
        FlyScan::cancel(self)
    }

    fn fail(&mut self, reason: &str) -> AppResult<()> {
        FlyScan::fail(self, reason)
    }
}

/// Resets the busy flag even if the scan future is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes step scans against a motion port and an acquisition port.
pub struct ScanApplicationService {
    motion: Arc<dyn MotionPort>,
    acquisition: Arc<dyn AcquisitionPort>,
    bus: Arc<EventBus>,
    selector: MotionProfileSelector,
    settings: ScanServiceSettings,
    control: ScanControl,
    busy: AtomicBool,
    status: RwLock<ScanStatusSnapshot>,
    last_scan: Mutex<Option<StepScan>>,
    last_fly_scan: Mutex<Option<FlyScan>>,
}

impl ScanApplicationService {
    /// Create a service with the default selector and settings.
    pub fn new(
        motion: Arc<dyn MotionPort>,
        acquisition: Arc<dyn AcquisitionPort>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            motion,
            acquisition,
            bus,
            selector: MotionProfileSelector::default(),
            settings: ScanServiceSettings::default(),
            control: ScanControl::default(),
            busy: AtomicBool::new(false),
            status: RwLock::new(ScanStatusSnapshot::default()),
            last_scan: Mutex::new(None),
            last_fly_scan: Mutex::new(None),
        }
    }

    /// Replace the motion profile selector.
    pub fn with_selector(mut self, selector: MotionProfileSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the loop settings.
    pub fn with_settings(mut self, settings: ScanServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shared pause/cancel handle.
    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    /// Bus the service publishes on.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Request a pause at the next safe point.
    pub fn pause_scan(&self) {
        info!("Pause requested");
        self.control.request_pause();
    }

    /// Resume a paused scan.
    pub fn resume_scan(&self) {
        info!("Resume requested");
        self.control.request_resume();
    }

    /// Cancel the running scan.
    pub fn cancel_scan(&self) {
        info!("Cancel requested");
        self.control.request_cancel();
    }

    /// Whether a scan is executing.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Current status.
    pub fn status(&self) -> ScanStatusSnapshot {
        self.status.read().clone()
    }

    /// Take the aggregate of the last finished scan.
    pub fn take_last_scan(&self) -> Option<StepScan> {
        self.last_scan.lock().take()
    }

    /// Run a scan to completion on the current task.
    ///
    /// Returns `true` when every point was acquired. Failures and
    /// cancellation return `false`; the reason is published on the bus.
    pub async fn execute_scan(&self, config: StepScanConfig) -> bool {
        if !self.begin() {
            return false;
        }
        let _busy = BusyGuard(&self.busy);
        self.run_scan(config).await
    }

    /// Run a scan on a dedicated task.
    ///
    /// Control flags are reset before the task is spawned, so pause or
    /// cancel requests made right after this call apply to the new scan.
    pub fn spawn_scan(self: Arc<Self>, config: StepScanConfig) -> JoinHandle<bool> {
        let acquired = self.begin();
        tokio::spawn(async move {
            if !acquired {
                return false;
            }
            let _busy = BusyGuard(&self.busy);
            self.run_scan(config).await
        })
    }

    /// Claim the service for a new scan and clear stale control flags.
    fn begin(&self) -> bool {
        if self.busy.swap(true, Ordering::SeqCst) {
            warn!("A scan is already running, request ignored");
            return false;
        }
        self.control.reset();
        true
    }

    async fn run_scan(&self, config: StepScanConfig) -> bool {
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config);
        let motions = match ScanTrajectoryFactory::create_motions(trajectory.points(), &self.selector)
        {
            Ok(motions) => motions,
            Err(err) => {
                error!(error = %err, "Motion planning failed");
                return false;
            }
        };

        let mut scan = StepScan::new(config, trajectory, motions);
        let span = tracing::info_span!("scan", scan_id = %scan.id());
        let completed = self.run_loop(&mut scan).instrument(span).await;
        *self.last_scan.lock() = Some(scan);
        completed
    }

    async fn run_loop(&self, scan: &mut StepScan) -> bool {
        if let Err(err) = scan.start() {
            error!(error = %err, "Scan could not start");
            return false;
        }
        info!(
            total_points = scan.total_points(),
            pattern = %scan.config().pattern(),
            "Scan started"
        );
        self.update_status(scan);
        self.bus.publish(DomainEvent::ScanStarted {
            scan_id: scan.id(),
            config: scan.config().clone(),
        });

        let outcome = self.drive(scan).await;
        let completed = self.finish(scan, outcome);
        self.update_status(scan);
        completed
    }

    async fn drive(&self, scan: &mut StepScan) -> AppResult<LoopOutcome> {
        let token = self.control.token();

        if let Some(speed) = scan.config().motion_speed_mm_s() {
            self.motion.set_speed(speed).await?;
        }
        self.acquisition
            .configure_for_uncertainty(scan.config().measurement_uncertainty())
            .await?;

        let started = Instant::now();
        while let Some(position) = scan.next_position() {
            let index = scan.current_point_index();

            if token.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }
            if let Flow::Cancel = self.pause_point(scan, &token).await? {
                return Ok(LoopOutcome::Cancelled);
            }
            if let Flow::Cancel = self.move_to_point(scan, index, position, &token).await? {
                return Ok(LoopOutcome::Cancelled);
            }
            if let Flow::Cancel = stabilize(scan.config().stabilization_delay(), &token).await {
                return Ok(LoopOutcome::Cancelled);
            }
            let Some(measurement) = self.acquire_point(scan.config(), &token).await? else {
                return Ok(LoopOutcome::Cancelled);
            };

            scan.add_result(ScanPointResult {
                position,
                measurement: measurement.clone(),
                point_index: index,
            })?;
            self.update_progress(scan, started.elapsed());
            debug!(point_index = index, %position, "Point acquired");
            self.bus.publish(DomainEvent::ScanPointAcquired {
                scan_id: scan.id(),
                point_index: index,
                position,
                measurement,
            });
        }

        Ok(LoopOutcome::Completed)
    }

    async fn pause_point<S: ScanAggregate>(
        &self,
        scan: &mut S,
        token: &CancellationToken,
    ) -> AppResult<Flow> {
        if !self.control.is_pause_requested() {
            return Ok(Flow::Continue);
        }

        scan.pause()?;
        let index = scan.progress().current;
        info!(point_index = index, "Scan paused");
        self.update_status(scan);
        self.bus.publish(DomainEvent::ScanPaused {
            scan_id: scan.id(),
            current_point_index: index,
        });

        let mut pause = self.control.pause_receiver();
        let resumed = tokio::select! {
            _ = token.cancelled() => false,
            resumed = wait_until_resumed(&mut pause) => resumed,
        };
        if !resumed {
            return Ok(Flow::Cancel);
        }

        scan.resume()?;
        info!(point_index = index, "Scan resumed");
        self.update_status(scan);
        self.bus.publish(DomainEvent::ScanResumed {
            scan_id: scan.id(),
            resume_from_point_index: index,
        });
        Ok(Flow::Continue)
    }

    async fn move_to_point(
        &self,
        scan: &mut StepScan,
        index: usize,
        position: Position2D,
        token: &CancellationToken,
    ) -> AppResult<Flow> {
        let motion_id = match self.motion.move_to(position).await {
            Ok(motion_id) => motion_id,
            Err(err) => {
                mark_motion_failed(scan, index, &err.to_string());
                return Err(err);
            }
        };
        let started = Instant::now();
        if let Some(motion) = scan.motion_into_point_mut(index) {
            motion.start(motion_id.as_str())?;
        }

        match self.settle(token, &motion_id).await {
            Ok(Flow::Continue) => {
                if let Some(motion) = scan.motion_into_point_mut(index) {
                    motion.complete(started.elapsed())?;
                }
                Ok(Flow::Continue)
            }
            Ok(Flow::Cancel) => {
                mark_motion_failed(scan, index, "cancelled");
                Ok(Flow::Cancel)
            }
            Err(err) => {
                mark_motion_failed(scan, index, &err.to_string());
                Err(err)
            }
        }
    }

    /// Wait for the stage to stop, bounded by the move timeout and raced
    /// against cancellation. The stage is told to stop on timeout or cancel.
    async fn settle(&self, token: &CancellationToken, motion_id: &str) -> AppResult<Flow> {
        let timeout = self.settings.move_timeout;
        let waited = tokio::select! {
            _ = token.cancelled() => None,
            result = tokio::time::timeout(timeout, self.motion.wait_until_stopped()) => Some(result),
        };

        match waited {
            Some(Ok(Ok(()))) => Ok(Flow::Continue),
            Some(Ok(Err(err))) => Err(err),
            Some(Err(_elapsed)) => {
                self.stop_stage().await;
                Err(ScanError::Motion(format!(
                    "Stage did not stop within {timeout:?} (motion {motion_id})"
                )))
            }
            None => {
                self.stop_stage().await;
                Ok(Flow::Cancel)
            }
        }
    }

    async fn stop_stage(&self) {
        if let Err(err) = self.motion.stop().await {
            warn!(error = %err, "Failed to stop stage");
        }
    }

    /// Acquire and average samples, growing the averaging until the
    /// uncertainty target is met or the attempt cap is reached.
    /// `None` means the scan was cancelled mid-acquisition.
    async fn acquire_point(
        &self,
        config: &StepScanConfig,
        token: &CancellationToken,
    ) -> AppResult<Option<Measurement>> {
        let target = config.measurement_uncertainty();
        let noise = self.acquisition.get_quantification_noise();
        let max_attempts = self.settings.max_uncertainty_attempts.max(1);
        let mut averaging = config.averaging_per_position();

        for attempt in 1..=max_attempts {
            let mut samples = Vec::with_capacity(averaging);
            for _ in 0..averaging {
                let sample = tokio::select! {
                    _ = token.cancelled() => return Ok(None),
                    sample = self.acquisition.acquire_sample() => sample?,
                };
                samples.push(sample);
            }

            let measurement = aggregate(&samples, noise)?;
            let achieved = measurement.uncertainty_estimate_volts.unwrap_or(0.0);
            if target.is_met_by(achieved) {
                return Ok(Some(measurement));
            }
            if attempt == max_attempts {
                warn!(
                    achieved_volts = achieved,
                    target_volts = target.max_uncertainty_volts(),
                    attempts = attempt,
                    "Uncertainty target not met, keeping last measurement"
                );
                return Ok(Some(measurement));
            }

            averaging = averaging.saturating_mul(self.settings.averaging_growth_factor.max(2));
            debug!(
                achieved_volts = achieved,
                next_averaging = averaging,
                "Uncertainty above target, re-averaging"
            );
        }

        // max_attempts >= 1, the loop always returns
        Err(ScanError::Acquisition(
            "No acquisition attempt was made".to_string(),
        ))
    }

    fn finish<S: ScanAggregate>(&self, scan: &mut S, outcome: AppResult<LoopOutcome>) -> bool {
        let scan_id = scan.id();
        let outcome = match outcome {
            Ok(LoopOutcome::Completed) => scan.complete().map(|()| LoopOutcome::Completed),
            Ok(LoopOutcome::Cancelled) => scan.cancel().map(|()| LoopOutcome::Cancelled),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(LoopOutcome::Completed) => {
                let total_points = scan.points_acquired();
                info!(total_points, "Scan completed");
                self.bus.publish(DomainEvent::ScanCompleted {
                    scan_id,
                    total_points,
                });
                true
            }
            Ok(LoopOutcome::Cancelled) => {
                let points_acquired = scan.points_acquired();
                info!(points_acquired, "Scan cancelled");
                self.bus.publish(DomainEvent::ScanCancelled {
                    scan_id,
                    points_acquired,
                });
                false
            }
            Err(err) => {
                let reason = err.to_string();
                error!(error = %reason, point_index = scan.progress().current, "Scan failed");
                if let Err(transition) = scan.fail(&reason) {
                    error!(error = %transition, "Could not mark scan as failed");
                }
                self.bus.publish(DomainEvent::ScanFailed { scan_id, reason });
                false
            }
        }
    }

    fn update_status<S: ScanAggregate>(&self, scan: &S) {
        let progress = scan.progress();
        let mut status = self.status.write();
        status.scan_id = Some(scan.id());
        status.status = Some(scan.status());
        status.is_running = scan.status().is_active();
        status.is_paused = scan.status() == ScanStatus::Paused;
        status.current_point_index = progress.current;
        status.total_points = progress.total;
        status.progress_percentage = progress.percentage;
        if scan.status().is_final() {
            status.estimated_remaining_seconds = 0.0;
        } else if progress.current == 0 {
            status.estimated_remaining_seconds = scan.planned_duration().as_secs_f64();
        }
    }

    fn update_progress<S: ScanAggregate>(&self, scan: &S, elapsed: Duration) {
        self.update_status(scan);
        let progress = scan.progress();
        if progress.current > 0 {
            let per_point = elapsed.as_secs_f64() / progress.current as f64;
            let remaining = progress.total.saturating_sub(progress.current) as f64;
            self.status.write().estimated_remaining_seconds = per_point * remaining;
        }
    }
}

async fn wait_until_resumed(pause: &mut watch::Receiver<bool>) -> bool {
    pause.wait_for(|paused| !*paused).await.is_ok()
}

async fn stabilize(delay: Duration, token: &CancellationToken) -> Flow {
    if delay.is_zero() {
        return Flow::Continue;
    }
    tokio::select! {
        _ = token.cancelled() => Flow::Cancel,
        _ = tokio::time::sleep(delay) => Flow::Continue,
    }
}

fn mark_motion_failed(scan: &mut StepScan, index: usize, reason: &str) {
    if let Some(motion) = scan.motion_into_point_mut(index) {
        if let Err(err) = motion.fail(reason) {
            debug!(error = %err, "Motion already settled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags() {
        let control = ScanControl::default();
        assert!(!control.is_pause_requested());
        control.request_pause();
        assert!(control.is_pause_requested());
        control.request_resume();
        assert!(!control.is_pause_requested());

        let token = control.token();
        control.request_cancel();
        assert!(token.is_cancelled());

        control.reset();
        assert!(!control.is_cancel_requested());
        assert!(!control.token().is_cancelled());
    }

    #[test]
    fn settings_defaults() {
        let settings = ScanServiceSettings::default();
        assert_eq!(settings.move_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_uncertainty_attempts, 3);
        assert_eq!(settings.averaging_growth_factor, 2);
    }
}
