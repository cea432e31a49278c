//! Fly-scan execution.
//!
//! The stage is sent to the first grid corner and then along every segment
//! with the configured profile. While a segment is in flight the detector is
//! read on a fixed schedule (`k / acquisition_rate_hz` after the move was
//! commanded) and each sample is recorded at the position the profile
//! predicts for that instant.
//!
//! ```text
//! set_speed ─> move_to(origin) ─> settle ─┐
//!   ┌─────────────────────────────────────┘
//!   └─> cancel? ─> pause? ─> move_to(next) ─> sample, sample, ... ─> settle ─┐
//!   ┌────────────────────────────────────────────────────────────────────────┘
//!   └─> next segment
//! ```
//!
//! Pause and cancel are honoured between segments; cancel is also raced
//! against every scheduled sample and the final settle.

use super::{BusyGuard, Flow, LoopOutcome, ScanApplicationService};
use crate::error::AppResult;
use crate::events::DomainEvent;
use crate::scan::{AcquisitionRateCapability, FlyScan, FlyScanConfig, Position2D, ScanPointResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

impl ScanApplicationService {
    /// Run a fly scan to completion on the current task.
    ///
    /// The config is first checked against `capability`. A config the
    /// detector cannot keep up with is refused: errors are logged, nothing
    /// moves and no event is published. Warnings are logged and the scan
    /// runs anyway.
    pub async fn execute_fly_scan(
        &self,
        config: FlyScanConfig,
        capability: AcquisitionRateCapability,
    ) -> bool {
        if !self.begin() {
            return false;
        }
        let _busy = BusyGuard(&self.busy);
        self.run_fly_scan(config, capability).await
    }

    /// Run a fly scan on a dedicated task. See [`execute_fly_scan`](Self::execute_fly_scan).
    pub fn spawn_fly_scan(
        self: Arc<Self>,
        config: FlyScanConfig,
        capability: AcquisitionRateCapability,
    ) -> JoinHandle<bool> {
        let acquired = self.begin();
        tokio::spawn(async move {
            if !acquired {
                return false;
            }
            let _busy = BusyGuard(&self.busy);
            self.run_fly_scan(config, capability).await
        })
    }

    /// Take the aggregate of the last finished fly scan.
    pub fn take_last_fly_scan(&self) -> Option<FlyScan> {
        self.last_fly_scan.lock().take()
    }

    async fn run_fly_scan(
        &self,
        config: FlyScanConfig,
        capability: AcquisitionRateCapability,
    ) -> bool {
        let validation = config.validate_with_capability(&capability);
        for warning in &validation.warnings {
            warn!(%warning, "Fly scan degraded");
        }
        if !validation.is_valid() {
            for reason in &validation.errors {
                error!(%reason, %capability, "Fly scan refused");
            }
            return false;
        }

        let mut scan = match FlyScan::new(config) {
            Ok(scan) => scan,
            Err(err) => {
                error!(error = %err, "Fly scan planning failed");
                return false;
            }
        };
        let span = tracing::info_span!("fly_scan", scan_id = %scan.id());
        let completed = self.run_fly_loop(&mut scan).instrument(span).await;
        *self.last_fly_scan.lock() = Some(scan);
        completed
    }

    async fn run_fly_loop(&self, scan: &mut FlyScan) -> bool {
        if let Err(err) = scan.start() {
            error!(error = %err, "Fly scan could not start");
            return false;
        }
        info!(
            segments = scan.motions().len(),
            expected_points = scan.expected_points(),
            rate_hz = scan.config().acquisition_rate_hz(),
            "Fly scan started"
        );
        self.update_status(scan);
        self.bus.publish(DomainEvent::FlyScanStarted {
            scan_id: scan.id(),
            config: scan.config().clone(),
            expected_points: scan.expected_points(),
        });

        let outcome = self.drive_fly(scan).await;
        let completed = self.finish(scan, outcome);
        self.update_status(scan);
        completed
    }

    async fn drive_fly(&self, scan: &mut FlyScan) -> AppResult<LoopOutcome> {
        let token = self.control.token();
        let rate = scan.config().acquisition_rate_hz();

        self.motion
            .set_speed(scan.config().motion_profile().target_speed())
            .await?;

        let Some(origin) = scan.trajectory().get(0) else {
            return Ok(LoopOutcome::Completed);
        };
        let motion_id = self.motion.move_to(origin).await?;
        if let Flow::Cancel = self.settle(&token, &motion_id).await? {
            return Ok(LoopOutcome::Cancelled);
        }

        let started = std::time::Instant::now();
        for index in 0..scan.motions().len() {
            if token.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }
            if let Flow::Cancel = self.pause_point(scan, &token).await? {
                return Ok(LoopOutcome::Cancelled);
            }

            let (Some(from), Some(to)) = (scan.trajectory().get(index), scan.trajectory().get(index + 1))
            else {
                break;
            };
            let planned = match scan.motions().get(index) {
                Some(motion) => motion.sample_positions(from, rate),
                None => break,
            };
            if let Flow::Cancel = self.fly_segment(scan, index, to, &planned, &token).await? {
                return Ok(LoopOutcome::Cancelled);
            }
            self.update_progress(scan, started.elapsed());
            debug!(segment = index, samples = planned.len(), "Segment done");
        }

        Ok(LoopOutcome::Completed)
    }

    /// Fly segment `index` to `target`, sampling at every planned position.
    async fn fly_segment(
        &self,
        scan: &mut FlyScan,
        index: usize,
        target: Position2D,
        planned: &[Position2D],
        token: &CancellationToken,
    ) -> AppResult<Flow> {
        let rate = scan.config().acquisition_rate_hz();
        let motion_id = match self.motion.move_to(target).await {
            Ok(motion_id) => motion_id,
            Err(err) => {
                fail_segment(scan, index, &err.to_string());
                return Err(err);
            }
        };
        let started = Instant::now();
        if let Some(motion) = scan.motion_mut(index) {
            motion.start(motion_id.as_str())?;
        }

        for (k, &position) in planned.iter().enumerate() {
            let sample = tokio::select! {
                _ = token.cancelled() => None,
                sample = async {
                    wait_for_slot(started, k, rate).await;
                    self.acquisition.acquire_sample().await
                } => Some(sample),
            };
            let measurement = match sample {
                Some(Ok(measurement)) => measurement,
                Some(Err(err)) => {
                    self.stop_stage().await;
                    fail_segment(scan, index, &err.to_string());
                    return Err(err);
                }
                None => {
                    self.stop_stage().await;
                    fail_segment(scan, index, "cancelled");
                    return Ok(Flow::Cancel);
                }
            };

            let point_index = scan.results().len();
            scan.add_result(ScanPointResult {
                position,
                measurement: measurement.clone(),
                point_index,
            })?;
            self.bus.publish(DomainEvent::ScanPointAcquired {
                scan_id: scan.id(),
                point_index,
                position,
                measurement,
            });
        }

        match self.settle(token, &motion_id).await {
            Ok(Flow::Continue) => {
                if let Some(motion) = scan.motion_mut(index) {
                    motion.complete(started.elapsed())?;
                }
                Ok(Flow::Continue)
            }
            Ok(Flow::Cancel) => {
                fail_segment(scan, index, "cancelled");
                Ok(Flow::Cancel)
            }
            Err(err) => {
                fail_segment(scan, index, &err.to_string());
                Err(err)
            }
        }
    }
}

/// Sleep until sample `k` is due, `k / rate` seconds after `started`.
/// Offsets past what the clock can represent never come due.
async fn wait_for_slot(started: Instant, k: usize, rate: f64) {
    let due = Duration::try_from_secs_f64(k as f64 / rate)
        .ok()
        .and_then(|offset| started.checked_add(offset));
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}

fn fail_segment(scan: &mut FlyScan, index: usize, reason: &str) {
    if let Some(motion) = scan.motion_mut(index) {
        if let Err(err) = motion.fail(reason) {
            debug!(error = %err, "Segment already settled");
        }
    }
}
