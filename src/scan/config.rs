//! Scan definition value objects.
//!
//! Everything in this module is validated at construction. An invalid value
//! produces [`ScanError::Configuration`]; nothing is clamped or silently
//! corrected, so a config that builds is a config the engine can execute.

use crate::error::{AppResult, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Travel limit of the scanning stage on both axes (mm).
pub const PHYSICAL_MAX_MM: f64 = 1270.0;

/// Time budget per averaged sample used by duration estimates.
const SAMPLE_TIME_ESTIMATE: Duration = Duration::from_millis(100);

/// A point in the scan plane, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position2D {
    /// X coordinate (mm)
    pub x: f64,
    /// Y coordinate (mm)
    pub y: f64,
}

impl Position2D {
    /// Create a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

impl fmt::Display for Position2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}) mm", self.x, self.y)
    }
}

/// Rectangular region of the scan plane.
///
/// Per axis `0 <= min < max <= limit`. The default limit is
/// [`PHYSICAL_MAX_MM`]; use [`ScanZone::with_limits`] when the stage reports
/// its own travel range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanZone {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl ScanZone {
    /// Create a zone bounded by the physical stage travel.
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> AppResult<Self> {
        Self::with_limits(x_min, x_max, y_min, y_max, (PHYSICAL_MAX_MM, PHYSICAL_MAX_MM))
    }

    /// Create a zone bounded by explicit axis limits `(max_x, max_y)`.
    pub fn with_limits(
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        limits: (f64, f64),
    ) -> AppResult<Self> {
        check_axis("x", x_min, x_max, limits.0)?;
        check_axis("y", y_min, y_max, limits.1)?;
        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    /// Lower x bound (mm).
    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    /// Upper x bound (mm).
    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    /// Lower y bound (mm).
    pub fn y_min(&self) -> f64 {
        self.y_min
    }

    /// Upper y bound (mm).
    pub fn y_max(&self) -> f64 {
        self.y_max
    }

    /// Extent along x (mm).
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Extent along y (mm).
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Whether `position` lies inside the zone, boundary included.
    pub fn contains(&self, position: &Position2D) -> bool {
        (self.x_min..=self.x_max).contains(&position.x)
            && (self.y_min..=self.y_max).contains(&position.y)
    }
}

fn check_axis(axis: &str, min: f64, max: f64, limit: f64) -> AppResult<()> {
    if !min.is_finite() || !max.is_finite() {
        return Err(ScanError::Configuration(format!(
            "{axis} bounds must be finite, got [{min}, {max}]"
        )));
    }
    if min < 0.0 {
        return Err(ScanError::Configuration(format!(
            "{axis}_min must be >= 0, got {min}"
        )));
    }
    if min >= max {
        return Err(ScanError::Configuration(format!(
            "{axis}_min ({min}) must be strictly less than {axis}_max ({max})"
        )));
    }
    if max > limit {
        return Err(ScanError::Configuration(format!(
            "{axis}_max ({max}) exceeds axis limit {limit}"
        )));
    }
    Ok(())
}

/// Order in which grid points are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanPattern {
    /// Every line traversed in the same x direction.
    Raster,
    /// Alternating x direction on every line.
    Serpentine,
    /// Full y sweep for each x column.
    Comb,
}

impl fmt::Display for ScanPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPattern::Raster => write!(f, "RASTER"),
            ScanPattern::Serpentine => write!(f, "SERPENTINE"),
            ScanPattern::Comb => write!(f, "COMB"),
        }
    }
}

impl FromStr for ScanPattern {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RASTER" => Ok(ScanPattern::Raster),
            "SERPENTINE" => Ok(ScanPattern::Serpentine),
            "COMB" => Ok(ScanPattern::Comb),
            other => Err(ScanError::Configuration(format!(
                "Unknown scan pattern '{other}'. Must be one of: RASTER, SERPENTINE, COMB"
            ))),
        }
    }
}

/// Target uncertainty of a measurement, in volts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementUncertainty {
    max_uncertainty_volts: f64,
}

impl MeasurementUncertainty {
    /// Create a target. Must be finite and strictly positive.
    pub fn new(max_uncertainty_volts: f64) -> AppResult<Self> {
        if !max_uncertainty_volts.is_finite() || max_uncertainty_volts <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "max_uncertainty_volts must be > 0, got {max_uncertainty_volts}"
            )));
        }
        Ok(Self {
            max_uncertainty_volts,
        })
    }

    /// Maximum acceptable uncertainty (V).
    pub fn max_uncertainty_volts(&self) -> f64 {
        self.max_uncertainty_volts
    }

    /// Whether an achieved uncertainty satisfies the target.
    pub fn is_met_by(&self, achieved_volts: f64) -> bool {
        achieved_volts <= self.max_uncertainty_volts
    }
}

impl Default for MeasurementUncertainty {
    fn default() -> Self {
        Self {
            max_uncertainty_volts: 1e-3,
        }
    }
}

/// Fully validated step-scan definition.
///
/// Build one with [`StepScanConfig::builder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepScanConfig {
    zone: ScanZone,
    x_nb_points: usize,
    y_nb_points: usize,
    pattern: ScanPattern,
    stabilization_delay_ms: u64,
    averaging_per_position: usize,
    measurement_uncertainty: MeasurementUncertainty,
    motion_speed_mm_s: Option<f64>,
}

impl StepScanConfig {
    /// Start building a config over `zone`.
    pub fn builder(zone: ScanZone) -> StepScanConfigBuilder {
        StepScanConfigBuilder::new(zone)
    }

    /// Scanned zone.
    pub fn zone(&self) -> &ScanZone {
        &self.zone
    }

    /// Number of grid columns.
    pub fn x_nb_points(&self) -> usize {
        self.x_nb_points
    }

    /// Number of grid rows.
    pub fn y_nb_points(&self) -> usize {
        self.y_nb_points
    }

    /// Visiting order.
    pub fn pattern(&self) -> ScanPattern {
        self.pattern
    }

    /// Settling time after each move.
    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    /// Samples averaged at each point.
    pub fn averaging_per_position(&self) -> usize {
        self.averaging_per_position
    }

    /// Uncertainty target for each point.
    pub fn measurement_uncertainty(&self) -> MeasurementUncertainty {
        self.measurement_uncertainty
    }

    /// Optional stage speed override (mm/s).
    pub fn motion_speed_mm_s(&self) -> Option<f64> {
        self.motion_speed_mm_s
    }

    /// Number of grid points, `x_nb_points * y_nb_points`.
    pub fn total_points(&self) -> usize {
        self.x_nb_points.saturating_mul(self.y_nb_points)
    }

    /// Dwell time estimate excluding motion: settling plus averaging per point.
    ///
    /// Saturates at [`Duration::MAX`] for configs whose dwell time does not
    /// fit in a `Duration`.
    pub fn estimated_duration(&self) -> Duration {
        let averaging = SAMPLE_TIME_ESTIMATE
            .saturating_mul(u32::try_from(self.averaging_per_position).unwrap_or(u32::MAX));
        let per_point = self.stabilization_delay().saturating_add(averaging);
        per_point.saturating_mul(u32::try_from(self.total_points()).unwrap_or(u32::MAX))
    }
}

/// Builder for [`StepScanConfig`]. Validation runs in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct StepScanConfigBuilder {
    zone: ScanZone,
    x_nb_points: usize,
    y_nb_points: usize,
    pattern: ScanPattern,
    stabilization_delay_ms: u64,
    averaging_per_position: usize,
    measurement_uncertainty: MeasurementUncertainty,
    motion_speed_mm_s: Option<f64>,
}

impl StepScanConfigBuilder {
    fn new(zone: ScanZone) -> Self {
        Self {
            zone,
            x_nb_points: 1,
            y_nb_points: 1,
            pattern: ScanPattern::Raster,
            stabilization_delay_ms: 0,
            averaging_per_position: 1,
            measurement_uncertainty: MeasurementUncertainty::default(),
            motion_speed_mm_s: None,
        }
    }

    /// Grid size.
    pub fn points(mut self, x_nb_points: usize, y_nb_points: usize) -> Self {
        self.x_nb_points = x_nb_points;
        self.y_nb_points = y_nb_points;
        self
    }

    /// Visiting order.
    pub fn pattern(mut self, pattern: ScanPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Settling time after each move, in milliseconds.
    pub fn stabilization_delay_ms(mut self, delay_ms: u64) -> Self {
        self.stabilization_delay_ms = delay_ms;
        self
    }

    /// Samples averaged per point.
    pub fn averaging_per_position(mut self, averaging: usize) -> Self {
        self.averaging_per_position = averaging;
        self
    }

    /// Uncertainty target.
    pub fn measurement_uncertainty(mut self, uncertainty: MeasurementUncertainty) -> Self {
        self.measurement_uncertainty = uncertainty;
        self
    }

    /// Stage speed override (mm/s).
    pub fn motion_speed_mm_s(mut self, speed: Option<f64>) -> Self {
        self.motion_speed_mm_s = speed;
        self
    }

    /// Validate and build.
    pub fn build(self) -> AppResult<StepScanConfig> {
        if self.x_nb_points < 1 || self.y_nb_points < 1 {
            return Err(ScanError::Configuration(format!(
                "Point counts must be >= 1, got {} x {}",
                self.x_nb_points, self.y_nb_points
            )));
        }
        if self.averaging_per_position < 1 {
            return Err(ScanError::Configuration(
                "averaging_per_position must be >= 1".to_string(),
            ));
        }
        if let Some(speed) = self.motion_speed_mm_s {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(ScanError::Configuration(format!(
                    "motion_speed_mm_s must be > 0, got {speed}"
                )));
            }
        }

        Ok(StepScanConfig {
            zone: self.zone,
            x_nb_points: self.x_nb_points,
            y_nb_points: self.y_nb_points,
            pattern: self.pattern,
            stabilization_delay_ms: self.stabilization_delay_ms,
            averaging_per_position: self.averaging_per_position,
            measurement_uncertainty: self.measurement_uncertainty,
            motion_speed_mm_s: self.motion_speed_mm_s,
        })
    }
}

/// Settings of the continuous (time-series) acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContinuousAcquisitionConfig {
    sample_rate_hz: f64,
    #[serde(skip)]
    sample_interval: Duration,
    max_duration: Option<Duration>,
    target_uncertainty: Option<MeasurementUncertainty>,
}

impl ContinuousAcquisitionConfig {
    /// Create a config sampling at `sample_rate_hz`, unbounded in time.
    ///
    /// The rate must be finite, positive and slow enough that one sample
    /// period is representable as a [`Duration`].
    pub fn new(sample_rate_hz: f64) -> AppResult<Self> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "sample_rate_hz must be > 0, got {sample_rate_hz}"
            )));
        }
        let sample_interval = Duration::try_from_secs_f64(sample_rate_hz.recip())
            .map_err(|err| {
                ScanError::Configuration(format!(
                    "sample_rate_hz {sample_rate_hz} gives no usable sample interval: {err}"
                ))
            })?;
        Ok(Self {
            sample_rate_hz,
            sample_interval,
            max_duration: None,
            target_uncertainty: None,
        })
    }

    /// Stop the loop on its own after `duration`.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Configure the device for an uncertainty target before sampling.
    pub fn with_target_uncertainty(mut self, uncertainty: MeasurementUncertainty) -> Self {
        self.target_uncertainty = Some(uncertainty);
        self
    }

    /// Sampling rate (Hz).
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Optional time bound.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// Optional uncertainty target.
    pub fn target_uncertainty(&self) -> Option<MeasurementUncertainty> {
        self.target_uncertainty
    }

    /// Time between samples.
    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }
}
