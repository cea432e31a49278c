//! Benchmarking the detector's sustained sample rate.
//!
//! Fly scans predict sample positions from the acquisition rate, so the rate
//! is measured rather than trusted. The meter reads the port back to back,
//! timestamps every sample and reports the mean rate and its spread as an
//! [`AcquisitionRateCapability`]. The last result is cached and reused while
//! it is recent.

use crate::error::{AppResult, ScanError};
use crate::hardware::AcquisitionPort;
use crate::scan::fly_scan::{CAPABILITY_MAX_AGE, MIN_RATE_SAMPLES};
use crate::scan::AcquisitionRateCapability;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Samples read and discarded before timing starts.
pub const DEFAULT_WARMUP_SAMPLES: usize = 10;

/// Hard cap on timed samples, whatever the measurement window.
pub const MAX_TIMED_SAMPLES: usize = 100_000;

/// Measures and caches the acquisition rate of a port.
#[derive(Debug, Default)]
pub struct AcquisitionRateMeter {
    cached: Mutex<Option<AcquisitionRateCapability>>,
}

impl AcquisitionRateMeter {
    /// Meter with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time back-to-back samples for `window` after `warmup` discarded reads.
    ///
    /// Stops early after [`MAX_TIMED_SAMPLES`]. Fails when fewer than
    /// [`MIN_RATE_SAMPLES`] samples fit in the window, or when the samples
    /// arrive faster than the clock can separate.
    pub async fn measure(
        &self,
        port: &dyn AcquisitionPort,
        window: Duration,
        warmup: usize,
    ) -> AppResult<AcquisitionRateCapability> {
        for _ in 0..warmup {
            port.acquire_sample().await?;
        }

        let started = Instant::now();
        let mut timestamps = Vec::new();
        while started.elapsed() < window && timestamps.len() < MAX_TIMED_SAMPLES {
            port.acquire_sample().await?;
            timestamps.push(Instant::now());
        }
        let elapsed = started.elapsed();

        if timestamps.len() < MIN_RATE_SAMPLES {
            return Err(ScanError::Acquisition(format!(
                "Only {} samples in {window:?}, at least {MIN_RATE_SAMPLES} are needed",
                timestamps.len()
            )));
        }

        let intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs_f64())
            .collect();
        let (mean, std_dev) = mean_and_std_dev(&intervals);
        if mean <= 0.0 {
            return Err(ScanError::Acquisition(
                "Samples arrive faster than the clock resolution".to_string(),
            ));
        }

        // first-order propagation of the interval spread onto 1/interval
        let capability = AcquisitionRateCapability::new(
            mean.recip(),
            std_dev / (mean * mean),
            elapsed,
            timestamps.len(),
        )?;
        info!(%capability, "Acquisition rate measured");
        *self.cached.lock() = Some(capability);
        Ok(capability)
    }

    /// Last measurement, if it is still recent.
    pub fn cached(&self) -> Option<AcquisitionRateCapability> {
        self.cached
            .lock()
            .filter(|capability| capability.is_recent(CAPABILITY_MAX_AGE))
    }

    /// Recent cached measurement, or a fresh one.
    pub async fn measure_or_cached(
        &self,
        port: &dyn AcquisitionPort,
        window: Duration,
    ) -> AppResult<AcquisitionRateCapability> {
        if let Some(capability) = self.cached() {
            debug!(%capability, "Reusing acquisition rate measurement");
            return Ok(capability);
        }
        self.measure(port, window, DEFAULT_WARMUP_SAMPLES).await
    }
}

/// Mean and sample standard deviation. Zero spread for fewer than two values.
fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}
