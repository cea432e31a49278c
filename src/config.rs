//! Configuration system using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/scan.toml` (or a file given on the command line)
//! 3. Environment variables prefixed with `RUST_SCAN_`, with `__` separating
//!    nested keys
//!
//! # Example
//! ```no_run
//! use rust_scan::config::ScanEngineConfig;
//!
//! // RUST_SCAN_MOTION__MOVE_TIMEOUT=10s overrides motion.move_timeout
//! let config = ScanEngineConfig::load()?;
//! config.validate()?;
//! let scan = config.scan.to_domain()?;
//! # Ok::<(), rust_scan::error::ScanError>(())
//! ```

use crate::error::{AppResult, ScanError};
use crate::experiment::ScanServiceSettings;
use crate::hardware::mock::{ErrorConfig, MockMode};
use crate::scan::{
    ContinuousAcquisitionConfig, FlyScanConfig, MeasurementUncertainty, MotionProfile,
    MotionProfileSelector, ScanPattern, ScanZone, StepScanConfig, MAX_FLY_RATE_HZ,
    PHYSICAL_MAX_MM,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_SCAN_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanEngineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Motion planning and stage timeouts
    pub motion: MotionConfig,
    /// Per-point acquisition policy
    pub acquisition: AcquisitionConfig,
    /// Continuous acquisition mode
    pub continuous: ContinuousConfig,
    /// Default step scan
    pub scan: StepScanSettings,
    /// Fly-scan sampling over the `scan` grid
    pub fly_scan: FlyScanSettings,
    /// Mock hardware used by the command-line tool
    pub mock: MockDevicesConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust_scan".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Motion planning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Moves shorter than this use the slow profile (mm)
    pub small_distance_threshold_mm: f64,
    /// Profile for short moves
    pub slow_profile: MotionProfile,
    /// Profile for long moves
    pub fast_profile: MotionProfile,
    /// Upper bound on waiting for the stage to stop
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            small_distance_threshold_mm: 5.0,
            slow_profile: MotionProfile::default_slow(),
            fast_profile: MotionProfile::default_fast(),
            move_timeout: Duration::from_secs(30),
        }
    }
}

/// Acquisition policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Attempts per point to reach the uncertainty target
    pub max_uncertainty_attempts: u32,
    /// Averaging multiplier between attempts
    pub averaging_growth_factor: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_uncertainty_attempts: 3,
            averaging_growth_factor: 2,
        }
    }
}

/// Continuous acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    /// Sampling rate (Hz)
    pub sample_rate_hz: f64,
    /// Stop on its own after this long
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,
    /// Bound on joining the worker in `stop()`
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10.0,
            max_duration: None,
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Step scan as written in the config file.
///
/// Convert with [`to_domain`](Self::to_domain), which runs all validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepScanSettings {
    /// Lower x bound (mm)
    pub x_min: f64,
    /// Upper x bound (mm)
    pub x_max: f64,
    /// Lower y bound (mm)
    pub y_min: f64,
    /// Upper y bound (mm)
    pub y_max: f64,
    /// Grid columns
    pub x_nb_points: usize,
    /// Grid rows
    pub y_nb_points: usize,
    /// RASTER, SERPENTINE or COMB
    pub pattern: ScanPattern,
    /// Settling time after each move (ms)
    pub stabilization_delay_ms: u64,
    /// Samples averaged per point
    pub averaging_per_position: usize,
    /// Uncertainty target (V)
    pub max_uncertainty_volts: f64,
    /// Stage speed override (mm/s)
    pub motion_speed_mm_s: Option<f64>,
}

impl Default for StepScanSettings {
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 10.0,
            y_min: 0.0,
            y_max: 10.0,
            x_nb_points: 5,
            y_nb_points: 5,
            pattern: ScanPattern::Serpentine,
            stabilization_delay_ms: 50,
            averaging_per_position: 4,
            max_uncertainty_volts: 1e-3,
            motion_speed_mm_s: None,
        }
    }
}

impl StepScanSettings {
    /// Build a validated [`StepScanConfig`] bounded by the physical stage travel.
    pub fn to_domain(&self) -> AppResult<StepScanConfig> {
        self.to_domain_within((PHYSICAL_MAX_MM, PHYSICAL_MAX_MM))
    }

    /// Build a validated [`StepScanConfig`] whose zone fits inside the axis
    /// limits `(max_x, max_y)` reported by a stage.
    pub fn to_domain_within(&self, limits: (f64, f64)) -> AppResult<StepScanConfig> {
        let zone = ScanZone::with_limits(self.x_min, self.x_max, self.y_min, self.y_max, limits)?;
        StepScanConfig::builder(zone)
            .points(self.x_nb_points, self.y_nb_points)
            .pattern(self.pattern)
            .stabilization_delay_ms(self.stabilization_delay_ms)
            .averaging_per_position(self.averaging_per_position)
            .measurement_uncertainty(MeasurementUncertainty::new(self.max_uncertainty_volts)?)
            .motion_speed_mm_s(self.motion_speed_mm_s)
            .build()
    }
}

/// Fly-scan settings.
///
/// A fly scan covers the zone, grid and pattern of the `scan` section and
/// drives every segment with `motion.fast_profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyScanSettings {
    /// Detector rate during motion (Hz)
    pub acquisition_rate_hz: f64,
    /// Widest acceptable gap between samples (mm)
    pub max_spatial_gap_mm: f64,
    /// How long the detector rate is benchmarked before the scan
    #[serde(with = "humantime_serde")]
    pub rate_measurement_window: Duration,
}

impl Default for FlyScanSettings {
    fn default() -> Self {
        Self {
            acquisition_rate_hz: 50.0,
            max_spatial_gap_mm: 0.5,
            rate_measurement_window: Duration::from_secs(1),
        }
    }
}

/// Mock hardware settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDevicesConfig {
    /// instant or realistic
    pub mode: MockMode,
    /// Stage X travel (mm)
    pub stage_max_x_mm: f64,
    /// Stage Y travel (mm)
    pub stage_max_y_mm: f64,
    /// Half-width of the uniform sample noise (V)
    pub noise_amplitude_volts: f64,
    /// Digitizer noise floor (V)
    pub quantification_noise_volts: f64,
    /// RNG seed for reproducible noise and failures
    pub seed: Option<u64>,
    /// Probability (0..=1) that any mock operation fails
    pub failure_rate: f64,
}

impl Default for MockDevicesConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Realistic,
            stage_max_x_mm: PHYSICAL_MAX_MM,
            stage_max_y_mm: PHYSICAL_MAX_MM,
            noise_amplitude_volts: 1e-3,
            quantification_noise_volts: 1e-4,
            seed: None,
            failure_rate: 0.0,
        }
    }
}

impl MockDevicesConfig {
    /// Error injection for the mock devices.
    pub fn error_config(&self) -> ErrorConfig {
        if self.failure_rate > 0.0 {
            ErrorConfig::random_failures(self.failure_rate, self.seed)
        } else {
            ErrorConfig::none()
        }
    }
}

impl ScanEngineConfig {
    /// Load from `config/scan.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// Layered provider, exposed for callers that merge further sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ScanEngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.application.log_level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.max_uncertainty_attempts < 1 {
            return Err(ScanError::Configuration(
                "acquisition.max_uncertainty_attempts must be >= 1".to_string(),
            ));
        }
        if self.acquisition.averaging_growth_factor < 2 {
            return Err(ScanError::Configuration(format!(
                "acquisition.averaging_growth_factor must be >= 2, got {}",
                self.acquisition.averaging_growth_factor
            )));
        }
        if self.motion.move_timeout.is_zero() {
            return Err(ScanError::Configuration(
                "motion.move_timeout must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.mock.failure_rate) {
            return Err(ScanError::Configuration(format!(
                "mock.failure_rate must be within [0, 1], got {}",
                self.mock.failure_rate
            )));
        }

        self.selector()?;
        self.continuous_config()?;
        self.scan.to_domain()?;
        if self.fly_scan.rate_measurement_window.is_zero() {
            return Err(ScanError::Configuration(
                "fly_scan.rate_measurement_window must be > 0".to_string(),
            ));
        }
        let rate = self.fly_scan.acquisition_rate_hz;
        if !rate.is_finite() || rate <= 0.0 || rate > MAX_FLY_RATE_HZ {
            return Err(ScanError::Configuration(format!(
                "fly_scan.acquisition_rate_hz must be in (0, {MAX_FLY_RATE_HZ}], got {rate}"
            )));
        }
        let gap = self.fly_scan.max_spatial_gap_mm;
        if !gap.is_finite() || gap <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "fly_scan.max_spatial_gap_mm must be > 0, got {gap}"
            )));
        }
        Ok(())
    }

    /// Fly scan over the `scan` grid, checked against the stage limits
    /// `(max_x, max_y)`.
    pub fn fly_scan_config_within(&self, limits: (f64, f64)) -> AppResult<FlyScanConfig> {
        let scan = &self.scan;
        let zone = ScanZone::with_limits(scan.x_min, scan.x_max, scan.y_min, scan.y_max, limits)?;
        FlyScanConfig::builder(zone, self.motion.fast_profile)
            .points(scan.x_nb_points, scan.y_nb_points)
            .pattern(scan.pattern)
            .acquisition_rate_hz(self.fly_scan.acquisition_rate_hz)
            .max_spatial_gap_mm(self.fly_scan.max_spatial_gap_mm)
            .build()
    }

    /// Motion profile selector from the `motion` section.
    pub fn selector(&self) -> AppResult<MotionProfileSelector> {
        MotionProfileSelector::new(
            self.motion.slow_profile,
            self.motion.fast_profile,
            self.motion.small_distance_threshold_mm,
        )
    }

    /// Orchestrator settings from the `motion` and `acquisition` sections.
    pub fn service_settings(&self) -> ScanServiceSettings {
        ScanServiceSettings {
            move_timeout: self.motion.move_timeout,
            max_uncertainty_attempts: self.acquisition.max_uncertainty_attempts,
            averaging_growth_factor: self.acquisition.averaging_growth_factor,
        }
    }

    /// Continuous acquisition config from the `continuous` section.
    pub fn continuous_config(&self) -> AppResult<ContinuousAcquisitionConfig> {
        let config = ContinuousAcquisitionConfig::new(self.continuous.sample_rate_hz)?;
        Ok(match self.continuous.max_duration {
            Some(duration) => config.with_max_duration(duration),
            None => config,
        })
    }
}
