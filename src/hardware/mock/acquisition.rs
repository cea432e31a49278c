//! Mock six-channel lock-in acquisition device.

use super::{ErrorConfig, MockMode};
use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::AcquisitionPort;
use crate::scan::{Measurement, MeasurementUncertainty, CHANNEL_COUNT};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Sampling time in realistic mode.
const REALISTIC_SAMPLE_TIME: Duration = Duration::from_millis(10);

/// Mock acquisition device.
///
/// Every sample is a fixed baseline plus uniform noise in
/// `[-noise_amplitude, +noise_amplitude]` on each channel. A fixed seed makes
/// the sequence reproducible.
#[derive(Clone)]
pub struct MockAcquisitionDevice {
    baseline: [f64; CHANNEL_COUNT],
    noise_amplitude_volts: f64,
    quantification_noise_volts: f64,
    mode: MockMode,
    error_config: ErrorConfig,
    rng: Arc<Mutex<StdRng>>,
    sample_counter: Arc<AtomicU64>,
    configured_target: Arc<Mutex<Option<MeasurementUncertainty>>>,
}

impl MockAcquisitionDevice {
    /// Noiseless instant device reading zero on every channel.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring MockAcquisitionDevice
    pub fn builder() -> MockAcquisitionDeviceBuilder {
        MockAcquisitionDeviceBuilder::default()
    }

    /// Number of samples taken so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_counter.load(Ordering::SeqCst)
    }

    /// Target passed to the last `configure_for_uncertainty` call.
    pub fn configured_target(&self) -> Option<MeasurementUncertainty> {
        *self.configured_target.lock()
    }
}

impl Default for MockAcquisitionDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcquisitionPort for MockAcquisitionDevice {
    async fn acquire_sample(&self) -> AppResult<Measurement> {
        self.error_config
            .check_operation("acquire_sample", ScanError::Acquisition)?;
        if self.error_config.is_stalled("acquire_sample") {
            std::future::pending::<()>().await;
        }
        if self.mode == MockMode::Realistic {
            sleep(REALISTIC_SAMPLE_TIME).await;
        }

        let mut values = self.baseline;
        if self.noise_amplitude_volts > 0.0 {
            let mut rng = self.rng.lock();
            for value in values.iter_mut() {
                *value += rng.gen_range(-self.noise_amplitude_volts..=self.noise_amplitude_volts);
            }
        }

        self.sample_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Measurement::raw(values))
    }

    async fn is_ready(&self) -> AppResult<bool> {
        Ok(self.error_config.check_operation("is_ready", ScanError::Acquisition).is_ok())
    }

    fn get_quantification_noise(&self) -> f64 {
        self.quantification_noise_volts
    }

    async fn configure_for_uncertainty(&self, target: MeasurementUncertainty) -> AppResult<()> {
        self.error_config
            .check_operation("configure_for_uncertainty", ScanError::Acquisition)?;
        tracing::debug!(
            "MockAcquisitionDevice: configured for {:.3e} V",
            target.max_uncertainty_volts()
        );
        *self.configured_target.lock() = Some(target);
        Ok(())
    }
}

/// Builder for [`MockAcquisitionDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockAcquisitionDeviceBuilder {
    baseline: [f64; CHANNEL_COUNT],
    noise_amplitude_volts: f64,
    quantification_noise_volts: f64,
    seed: Option<u64>,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockAcquisitionDeviceBuilder {
    /// Value every channel reads without noise.
    pub fn baseline(mut self, baseline: [f64; CHANNEL_COUNT]) -> Self {
        self.baseline = baseline;
        self
    }

    /// Half-width of the uniform noise (V).
    pub fn noise_amplitude(mut self, volts: f64) -> Self {
        self.noise_amplitude_volts = volts.abs();
        self
    }

    /// Digitizer noise floor reported to the engine (V).
    pub fn quantification_noise(mut self, volts: f64) -> Self {
        self.quantification_noise_volts = volts.abs();
        self
    }

    /// Fixed RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
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

    /// Build the device.
    pub fn build(self) -> MockAcquisitionDevice {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MockAcquisitionDevice {
            baseline: self.baseline,
            noise_amplitude_volts: self.noise_amplitude_volts,
            quantification_noise_volts: self.quantification_noise_volts,
            mode: self.mode,
            error_config: self.error_config,
            rng: Arc::new(Mutex::new(rng)),
            sample_counter: Arc::new(AtomicU64::new(0)),
            configured_target: Arc::new(Mutex::new(None)),
        }
    }
}
