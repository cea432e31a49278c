//! Continuous (time-series) acquisition.
//!
//! The executor samples an acquisition port at a fixed rate on a background
//! task until it is stopped, its optional duration bound elapses, or the port
//! fails. Every run is identified by a fresh UUID and publishes:
//!
//! - `ContinuousAcquisitionSampleAcquired` for each sample, indices 0, 1, 2, ...
//! - `ContinuousAcquisitionFailed` if the port returned an error
//! - `ContinuousAcquisitionStopped` exactly once, on every exit path

use crate::error::AppResult;
use crate::events::{DomainEvent, EventBus};
use crate::hardware::AcquisitionPort;
use crate::scan::ContinuousAcquisitionConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Default bound on how long `stop()` waits for the worker.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timers further out than this are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct ActiveRun {
    id: Uuid,
    token: CancellationToken,
    config_tx: watch::Sender<ContinuousAcquisitionConfig>,
    handle: JoinHandle<()>,
}

/// Runs at most one continuous acquisition at a time.
pub struct ContinuousAcquisitionExecutor {
    bus: Arc<EventBus>,
    stop_timeout: Duration,
    active: Mutex<Option<ActiveRun>>,
}

impl ContinuousAcquisitionExecutor {
    /// Create a stopped executor publishing on `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Override how long `stop()` waits for the worker to exit.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Whether a worker is running.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Identifier of the running acquisition.
    pub fn current_acquisition_id(&self) -> Option<Uuid> {
        self.active
            .lock()
            .as_ref()
            .filter(|run| !run.handle.is_finished())
            .map(|run| run.id)
    }

    /// Start sampling `port` with `config`.
    ///
    /// Idempotent: while a run is active this returns its id and spawns
    /// nothing. Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        config: ContinuousAcquisitionConfig,
        port: Arc<dyn AcquisitionPort>,
    ) -> Uuid {
        let mut active = self.active.lock();
        if let Some(run) = active.as_ref().filter(|run| !run.handle.is_finished()) {
            debug!(acquisition_id = %run.id, "Continuous acquisition already running");
            return run.id;
        }

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (config_tx, config_rx) = watch::channel(config);
        let span = tracing::info_span!("continuous", acquisition_id = %id);
        let handle = tokio::spawn(
            run_worker(id, port, Arc::clone(&self.bus), token.clone(), config_rx).instrument(span),
        );
        info!(
            acquisition_id = %id,
            sample_rate_hz = config.sample_rate_hz(),
            "Continuous acquisition started"
        );

        *active = Some(ActiveRun {
            id,
            token,
            config_tx,
            handle,
        });
        id
    }

    /// Stop the worker and wait for it, bounded by the stop timeout.
    ///
    /// Returns `false` when the worker did not exit in time; it is then
    /// detached and left to finish on its own.
    pub async fn stop(&self) -> bool {
        let Some(run) = self.active.lock().take() else {
            return true;
        };
        let ActiveRun {
            id, token, handle, ..
        } = run;

        token.cancel();
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => {
                info!(acquisition_id = %id, "Continuous acquisition stopped");
                true
            }
            Ok(Err(err)) => {
                warn!(acquisition_id = %id, error = %err, "Continuous acquisition task failed");
                true
            }
            Err(_) => {
                warn!(
                    acquisition_id = %id,
                    timeout = ?self.stop_timeout,
                    "Continuous acquisition did not stop in time, detaching worker"
                );
                false
            }
        }
    }

    /// Apply a new config to the running worker without restarting it.
    ///
    /// Returns `false` when nothing is running.
    pub fn update_config(&self, config: ContinuousAcquisitionConfig) -> bool {
        match self.active.lock().as_ref() {
            Some(run) if !run.handle.is_finished() => {
                run.config_tx.send_replace(config);
                debug!(
                    acquisition_id = %run.id,
                    sample_rate_hz = config.sample_rate_hz(),
                    "Continuous acquisition config updated"
                );
                true
            }
            _ => false,
        }
    }
}

impl Drop for ContinuousAcquisitionExecutor {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.token.cancel();
        }
    }
}

async fn run_worker(
    id: Uuid,
    port: Arc<dyn AcquisitionPort>,
    bus: Arc<EventBus>,
    token: CancellationToken,
    mut config_rx: watch::Receiver<ContinuousAcquisitionConfig>,
) {
    let mut samples: u64 = 0;
    let result = sample_loop(id, port.as_ref(), &bus, &token, &mut config_rx, &mut samples).await;

    if let Err(err) = result {
        error!(error = %err, samples, "Continuous acquisition failed");
        bus.publish(DomainEvent::ContinuousAcquisitionFailed {
            acquisition_id: id,
            reason: err.to_string(),
        });
    }
    bus.publish(DomainEvent::ContinuousAcquisitionStopped {
        acquisition_id: id,
        samples_acquired: samples,
    });
}

async fn sample_loop(
    id: Uuid,
    port: &dyn AcquisitionPort,
    bus: &EventBus,
    token: &CancellationToken,
    config_rx: &mut watch::Receiver<ContinuousAcquisitionConfig>,
    samples: &mut u64,
) -> AppResult<()> {
    let started = Instant::now();
    let mut config = *config_rx.borrow_and_update();
    if let Some(target) = config.target_uncertainty() {
        port.configure_for_uncertainty(target).await?;
    }

    let mut deadline = config.max_duration().map(|max| after(started, max));

    loop {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            debug!(samples = *samples, "Maximum duration reached");
            return Ok(());
        }

        let sample = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = sleep_until_deadline(deadline) => {
                debug!(samples = *samples, "Maximum duration reached");
                return Ok(());
            }
            sample = port.acquire_sample() => sample?,
        };
        let sampled_at = Instant::now();
        bus.publish(DomainEvent::ContinuousAcquisitionSampleAcquired {
            acquisition_id: id,
            sample_index: *samples,
            sample,
        });
        *samples += 1;

        // Sleep until the next tick; a config change re-targets the tick.
        let mut next_tick = after(sampled_at, config.sample_interval());
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(next_tick) => break,
                _ = sleep_until_deadline(deadline) => {
                    debug!(samples = *samples, "Maximum duration reached");
                    return Ok(());
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        // executor dropped its handle to this run
                        return Ok(());
                    }
                    config = *config_rx.borrow_and_update();
                    next_tick = after(sampled_at, config.sample_interval());
                    deadline = config.max_duration().map(|max| after(started, max));
                    debug!(sample_rate_hz = config.sample_rate_hz(), "Sampling interval changed");
                }
            }
        }
    }
}

fn after(base: Instant, delay: Duration) -> Instant {
    base.checked_add(delay.min(FAR_FUTURE)).unwrap_or(base)
}

/// Resolves at `deadline`, never when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
