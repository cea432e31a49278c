//! Fly scans: sampling at a fixed rate while the stage keeps moving.
//!
//! A fly scan plans the same grid as a step scan, but every segment is driven
//! with one motion profile and the detector is read at
//! `acquisition_rate_hz` during the move. Sample positions are predicted from
//! the profile (see [`AtomicMotion::sample_positions`]), so the plan is only
//! trustworthy when the detector actually sustains that rate. A measured
//! [`AcquisitionRateCapability`] is checked against the config before
//! anything moves.

use super::config::{Position2D, ScanPattern, ScanZone};
use super::motion::{AtomicMotion, MotionProfile};
use super::step_scan::{Lifecycle, ScanOperation, ScanPointResult, ScanProgress, ScanStatus};
use super::trajectory::{ScanTrajectory, ScanTrajectoryFactory};
use crate::error::{AppResult, ScanError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Fastest acquisition rate a fly scan may request (Hz).
pub const MAX_FLY_RATE_HZ: f64 = 100_000.0;

/// Upper bound on the planned sample count of one fly scan.
pub const MAX_FLY_SAMPLES: usize = 1_000_000;

/// Gap between consecutive samples used when none is configured (mm).
pub const DEFAULT_MAX_SPATIAL_GAP_MM: f64 = 0.5;

/// Fewest samples a rate measurement may be based on.
pub const MIN_RATE_SAMPLES: usize = 10;

/// Capability measurements older than this draw a warning.
pub const CAPABILITY_MAX_AGE: Duration = Duration::from_secs(300);

/// Coefficient of variation (%) above which the rate counts as unstable.
pub const MAX_STABLE_CV_PERCENT: f64 = 5.0;

/// Standard deviations below the mean used for guaranteed rates.
pub const CONFIDENCE_SIGMA: f64 = 3.0;

/// Measured acquisition rate of a detector, with its spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcquisitionRateCapability {
    measured_rate_hz: f64,
    measured_std_dev_hz: f64,
    measured_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    measurement_duration: Duration,
    sample_count: usize,
}

impl AcquisitionRateCapability {
    /// Capability measured now.
    pub fn new(
        measured_rate_hz: f64,
        measured_std_dev_hz: f64,
        measurement_duration: Duration,
        sample_count: usize,
    ) -> AppResult<Self> {
        if !measured_rate_hz.is_finite() || measured_rate_hz <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "Measured rate must be > 0, got {measured_rate_hz}"
            )));
        }
        if !measured_std_dev_hz.is_finite() || measured_std_dev_hz < 0.0 {
            return Err(ScanError::Configuration(format!(
                "Rate standard deviation must be >= 0, got {measured_std_dev_hz}"
            )));
        }
        if measurement_duration.is_zero() {
            return Err(ScanError::Configuration(
                "Measurement duration must be > 0".to_string(),
            ));
        }
        if sample_count < MIN_RATE_SAMPLES {
            return Err(ScanError::Configuration(format!(
                "Rate measurement needs at least {MIN_RATE_SAMPLES} samples, got {sample_count}"
            )));
        }
        Ok(Self {
            measured_rate_hz,
            measured_std_dev_hz,
            measured_at: Utc::now(),
            measurement_duration,
            sample_count,
        })
    }

    /// Override the measurement timestamp.
    pub fn with_measured_at(mut self, measured_at: DateTime<Utc>) -> Self {
        self.measured_at = measured_at;
        self
    }

    /// Mean rate (Hz).
    pub fn measured_rate_hz(&self) -> f64 {
        self.measured_rate_hz
    }

    /// Standard deviation of the rate (Hz).
    pub fn measured_std_dev_hz(&self) -> f64 {
        self.measured_std_dev_hz
    }

    /// When the measurement was taken.
    pub fn measured_at(&self) -> DateTime<Utc> {
        self.measured_at
    }

    /// How long the measurement ran.
    pub fn measurement_duration(&self) -> Duration {
        self.measurement_duration
    }

    /// Samples the measurement is based on.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// `std_dev / mean`, in percent.
    pub fn coefficient_of_variation(&self) -> f64 {
        self.measured_std_dev_hz / self.measured_rate_hz * 100.0
    }

    /// Whether the rate varies by at most `max_cv_percent`.
    pub fn is_stable(&self, max_cv_percent: f64) -> bool {
        self.coefficient_of_variation() <= max_cv_percent
    }

    /// `mean - sigma * std_dev`, floored at zero.
    pub fn minimum_guaranteed_rate_hz(&self, sigma: f64) -> f64 {
        (self.measured_rate_hz - sigma * self.measured_std_dev_hz).max(0.0)
    }

    /// Widest gap between samples (mm) when moving at `speed_mm_s`.
    /// Infinite when no rate can be guaranteed.
    pub fn maximum_spacing_mm(&self, speed_mm_s: f64, sigma: f64) -> f64 {
        let rate = self.minimum_guaranteed_rate_hz(sigma);
        if rate <= 0.0 {
            f64::INFINITY
        } else {
            speed_mm_s / rate
        }
    }

    /// Whether the measurement is at most `max_age` old.
    pub fn is_recent(&self, max_age: Duration) -> bool {
        match (Utc::now() - self.measured_at).to_std() {
            Ok(age) => age <= max_age,
            // measured_at lies in the future
            Err(_) => true,
        }
    }
}

impl fmt::Display for AcquisitionRateCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} ± {:.1} Hz (CV {:.2}%, {} samples over {:.1} s)",
            self.measured_rate_hz,
            self.measured_std_dev_hz,
            self.coefficient_of_variation(),
            self.sample_count,
            self.measurement_duration.as_secs_f64()
        )
    }
}

/// Outcome of [`FlyScanConfig::validate_with_capability`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlyScanValidation {
    /// Reasons the scan cannot run.
    pub errors: Vec<String>,
    /// Degradations the scan can run with.
    pub warnings: Vec<String>,
}

impl FlyScanValidation {
    /// No errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fully validated fly-scan definition.
///
/// Build one with [`FlyScanConfig::builder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlyScanConfig {
    zone: ScanZone,
    x_nb_points: usize,
    y_nb_points: usize,
    pattern: ScanPattern,
    motion_profile: MotionProfile,
    acquisition_rate_hz: f64,
    max_spatial_gap_mm: f64,
}

impl FlyScanConfig {
    /// Start building a config over `zone`, moving with `motion_profile`.
    pub fn builder(zone: ScanZone, motion_profile: MotionProfile) -> FlyScanConfigBuilder {
        FlyScanConfigBuilder {
            zone,
            x_nb_points: 2,
            y_nb_points: 2,
            pattern: ScanPattern::Serpentine,
            motion_profile,
            acquisition_rate_hz: 100.0,
            max_spatial_gap_mm: DEFAULT_MAX_SPATIAL_GAP_MM,
        }
    }

    /// Region covered.
    pub fn zone(&self) -> &ScanZone {
        &self.zone
    }

    /// Grid columns.
    pub fn x_nb_points(&self) -> usize {
        self.x_nb_points
    }

    /// Grid rows.
    pub fn y_nb_points(&self) -> usize {
        self.y_nb_points
    }

    /// Visiting order of the grid corners.
    pub fn pattern(&self) -> ScanPattern {
        self.pattern
    }

    /// Profile every segment is driven with.
    pub fn motion_profile(&self) -> &MotionProfile {
        &self.motion_profile
    }

    /// Requested detector rate (Hz).
    pub fn acquisition_rate_hz(&self) -> f64 {
        self.acquisition_rate_hz
    }

    /// Widest acceptable gap between consecutive samples (mm).
    pub fn max_spatial_gap_mm(&self) -> f64 {
        self.max_spatial_gap_mm
    }

    /// Grid corners the stage passes through.
    pub fn total_grid_points(&self) -> usize {
        self.x_nb_points.saturating_mul(self.y_nb_points)
    }

    /// Slowest rate that keeps the gap at cruise speed within bounds.
    pub fn required_minimum_rate_hz(&self) -> f64 {
        self.motion_profile.target_speed() / self.max_spatial_gap_mm
    }

    /// Grid corners in visiting order.
    pub fn trajectory(&self) -> ScanTrajectory {
        ScanTrajectoryFactory::grid(
            &self.zone,
            self.x_nb_points,
            self.y_nb_points,
            self.pattern,
        )
    }

    /// One motion per segment, all with the configured profile.
    pub fn plan_motions(&self) -> AppResult<Vec<AtomicMotion>> {
        plan_segments(self.trajectory().points(), self.motion_profile)
    }

    /// Check the config against what the detector was measured to sustain.
    pub fn validate_with_capability(
        &self,
        capability: &AcquisitionRateCapability,
    ) -> FlyScanValidation {
        let mut result = FlyScanValidation::default();
        let speed = self.motion_profile.target_speed();

        if !capability.is_recent(CAPABILITY_MAX_AGE) {
            result.warnings.push(format!(
                "Rate measurement from {} is older than {}s, consider measuring again",
                capability.measured_at().format("%H:%M:%S"),
                CAPABILITY_MAX_AGE.as_secs()
            ));
        }
        if !capability.is_stable(MAX_STABLE_CV_PERCENT) {
            result.warnings.push(format!(
                "Acquisition rate is unstable (CV {:.2}%), sample positions may drift",
                capability.coefficient_of_variation()
            ));
        }

        let required = self.required_minimum_rate_hz();
        let guaranteed = capability.minimum_guaranteed_rate_hz(CONFIDENCE_SIGMA);
        if guaranteed < required {
            result.errors.push(format!(
                "Detector cannot achieve required rate: need {required:.1} Hz for a \
                 {} mm gap at {speed} mm/s, guaranteed {guaranteed:.1} Hz ({capability})",
                self.max_spatial_gap_mm
            ));
        }
        if self.acquisition_rate_hz > capability.measured_rate_hz() {
            result.errors.push(format!(
                "Requested rate {:.1} Hz exceeds measured {:.1} Hz",
                self.acquisition_rate_hz,
                capability.measured_rate_hz()
            ));
        }

        let spacing = capability.maximum_spacing_mm(speed, CONFIDENCE_SIGMA);
        if spacing > self.max_spatial_gap_mm {
            result.warnings.push(format!(
                "Gap between samples may reach {spacing:.3} mm at {speed} mm/s (limit {} mm)",
                self.max_spatial_gap_mm
            ));
        }
        result
    }
}

fn plan_segments(points: &[Position2D], profile: MotionProfile) -> AppResult<Vec<AtomicMotion>> {
    points
        .windows(2)
        .map(|pair| AtomicMotion::new(pair[1].x - pair[0].x, pair[1].y - pair[0].y, profile))
        .collect()
}

/// Builder for [`FlyScanConfig`].
#[derive(Debug, Clone)]
pub struct FlyScanConfigBuilder {
    zone: ScanZone,
    x_nb_points: usize,
    y_nb_points: usize,
    pattern: ScanPattern,
    motion_profile: MotionProfile,
    acquisition_rate_hz: f64,
    max_spatial_gap_mm: f64,
}

impl FlyScanConfigBuilder {
    /// Grid size, at least 2 x 2.
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

    /// Detector rate during motion (Hz).
    pub fn acquisition_rate_hz(mut self, rate_hz: f64) -> Self {
        self.acquisition_rate_hz = rate_hz;
        self
    }

    /// Widest acceptable gap between samples (mm).
    pub fn max_spatial_gap_mm(mut self, gap_mm: f64) -> Self {
        self.max_spatial_gap_mm = gap_mm;
        self
    }

    /// Validate and build.
    pub fn build(self) -> AppResult<FlyScanConfig> {
        if self.x_nb_points < 2 || self.y_nb_points < 2 {
            return Err(ScanError::Configuration(format!(
                "Fly scans need at least 2 x 2 points, got {} x {}",
                self.x_nb_points, self.y_nb_points
            )));
        }
        // every segment takes at least one sample
        let corners = self.x_nb_points.saturating_mul(self.y_nb_points);
        if corners > MAX_FLY_SAMPLES {
            return Err(ScanError::Configuration(format!(
                "Fly scan grid of {corners} points exceeds {MAX_FLY_SAMPLES} samples"
            )));
        }
        let rate = self.acquisition_rate_hz;
        if !rate.is_finite() || rate <= 0.0 || rate > MAX_FLY_RATE_HZ {
            return Err(ScanError::Configuration(format!(
                "acquisition_rate_hz must be in (0, {MAX_FLY_RATE_HZ}], got {rate}"
            )));
        }
        let gap = self.max_spatial_gap_mm;
        if !gap.is_finite() || gap <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "max_spatial_gap_mm must be > 0, got {gap}"
            )));
        }

        let config = FlyScanConfig {
            zone: self.zone,
            x_nb_points: self.x_nb_points,
            y_nb_points: self.y_nb_points,
            pattern: self.pattern,
            motion_profile: self.motion_profile,
            acquisition_rate_hz: rate,
            max_spatial_gap_mm: gap,
        };

        // counted in f64 so absurd plans are refused before anything allocates
        let profile = config.motion_profile;
        let planned: f64 = config
            .trajectory()
            .points()
            .windows(2)
            .map(|pair| {
                let seconds = profile.estimate_duration(pair[0].distance_to(&pair[1]));
                (seconds * rate).floor() + 1.0
            })
            .sum();
        if planned.is_nan() || planned > MAX_FLY_SAMPLES as f64 {
            return Err(ScanError::Configuration(format!(
                "Fly scan would take {planned} samples, the limit is {MAX_FLY_SAMPLES}"
            )));
        }
        Ok(config)
    }
}

/// A fly scan: configuration, plan, lifecycle and the samples taken on the fly.
///
/// Results are indexed in acquisition order. Unlike a step scan the aggregate
/// never completes itself when `expected_points` is reached; the executor
/// decides when the last segment is done.
#[derive(Debug, Clone, Serialize)]
pub struct FlyScan {
    id: Uuid,
    config: FlyScanConfig,
    trajectory: ScanTrajectory,
    motions: Vec<AtomicMotion>,
    expected_points: usize,
    #[serde(flatten)]
    lifecycle: Lifecycle,
    results: Vec<ScanPointResult>,
}

impl FlyScan {
    /// Plan a pending fly scan.
    pub fn new(config: FlyScanConfig) -> AppResult<Self> {
        let trajectory = config.trajectory();
        let motions = plan_segments(trajectory.points(), config.motion_profile)?;
        let rate = config.acquisition_rate_hz;
        let expected_points = motions
            .iter()
            .map(|motion| motion.sample_count(rate))
            .fold(0usize, usize::saturating_add);
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            trajectory,
            motions,
            expected_points,
            lifecycle: Lifecycle::new(),
            results: Vec::new(),
        })
    }

    /// Scan identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the scan was built from.
    pub fn config(&self) -> &FlyScanConfig {
        &self.config
    }

    /// Grid corners in visiting order.
    pub fn trajectory(&self) -> &ScanTrajectory {
        &self.trajectory
    }

    /// Planned segments.
    pub fn motions(&self) -> &[AtomicMotion] {
        &self.motions
    }

    /// Segment `index`, for execution bookkeeping.
    pub fn motion_mut(&mut self, index: usize) -> Option<&mut AtomicMotion> {
        self.motions.get_mut(index)
    }

    /// Samples the plan predicts over all segments.
    pub fn expected_points(&self) -> usize {
        self.expected_points
    }

    /// Samples recorded so far.
    pub fn results(&self) -> &[ScanPointResult] {
        &self.results
    }

    /// Current state.
    pub fn status(&self) -> ScanStatus {
        self.lifecycle.status()
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

    /// Recorded samples against the planned count.
    pub fn progress(&self) -> ScanProgress {
        let current = self.results.len();
        let total = self.expected_points;
        let percentage = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).min(100.0)
        };
        ScanProgress {
            current,
            total,
            percentage,
        }
    }

    /// Planned motion time over all segments.
    pub fn estimated_duration(&self) -> Duration {
        let seconds: f64 = self
            .motions
            .iter()
            .map(AtomicMotion::estimated_duration_seconds)
            .sum();
        Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
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

    /// Record a sample. Only while RUNNING.
    pub fn add_result(&mut self, result: ScanPointResult) -> AppResult<()> {
        self.lifecycle
            .require(ScanOperation::AddResult, |s| s == ScanStatus::Running)?;
        self.results.push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Measurement;

    fn profile() -> MotionProfile {
        MotionProfile::new(1.0, 10.0, 5.0, 5.0).unwrap()
    }

    fn zone() -> ScanZone {
        ScanZone::new(0.0, 100.0, 0.0, 100.0).unwrap()
    }

    fn config(rate: f64, gap: f64) -> FlyScanConfig {
        FlyScanConfig::builder(zone(), profile())
            .points(10, 10)
            .acquisition_rate_hz(rate)
            .max_spatial_gap_mm(gap)
            .build()
            .unwrap()
    }

    fn capability(rate: f64, std_dev: f64) -> AcquisitionRateCapability {
        AcquisitionRateCapability::new(rate, std_dev, Duration::from_secs(10), 1500).unwrap()
    }

    #[test]
    fn capability_rejects_bad_measurements() {
        let ten_s = Duration::from_secs(10);
        assert!(AcquisitionRateCapability::new(0.0, 1.0, ten_s, 100).is_err());
        assert!(AcquisitionRateCapability::new(100.0, -1.0, ten_s, 100).is_err());
        assert!(AcquisitionRateCapability::new(100.0, 1.0, Duration::ZERO, 100).is_err());
        assert!(AcquisitionRateCapability::new(100.0, 1.0, ten_s, 9).is_err());
        assert!(AcquisitionRateCapability::new(f64::NAN, 1.0, ten_s, 100).is_err());
        assert!(AcquisitionRateCapability::new(100.0, 1.0, ten_s, 10).is_ok());
    }

    #[test]
    fn capability_statistics() {
        let cap = capability(100.0, 2.0);
        assert!((cap.coefficient_of_variation() - 2.0).abs() < 1e-12);
        assert!(cap.is_stable(5.0));
        assert!(!capability(100.0, 10.0).is_stable(5.0));
        assert!((cap.minimum_guaranteed_rate_hz(3.0) - 94.0).abs() < 1e-12);
        assert!((cap.maximum_spacing_mm(9.4, 3.0) - 0.1).abs() < 1e-12);

        let noisy = capability(10.0, 5.0);
        assert_eq!(noisy.minimum_guaranteed_rate_hz(3.0), 0.0);
        assert!(noisy.maximum_spacing_mm(10.0, 3.0).is_infinite());
    }

    #[test]
    fn capability_age() {
        let cap = capability(100.0, 1.0);
        assert!(cap.is_recent(CAPABILITY_MAX_AGE));
        let old = cap.with_measured_at(Utc::now() - chrono::Duration::minutes(10));
        assert!(!old.is_recent(CAPABILITY_MAX_AGE));
        let ahead = cap.with_measured_at(Utc::now() + chrono::Duration::minutes(1));
        assert!(ahead.is_recent(CAPABILITY_MAX_AGE));
    }

    #[test]
    fn builder_validation() {
        let base = || FlyScanConfig::builder(zone(), profile());
        assert!(base().points(1, 10).build().is_err());
        assert!(base().points(usize::MAX, 2).build().is_err());
        assert!(base().acquisition_rate_hz(0.0).build().is_err());
        assert!(base().acquisition_rate_hz(MAX_FLY_RATE_HZ * 2.0).build().is_err());
        assert!(base().max_spatial_gap_mm(0.0).build().is_err());
        assert!(base().max_spatial_gap_mm(f64::INFINITY).build().is_err());
        assert!(base().build().is_ok());
    }

    #[test]
    fn builder_refuses_oversized_plans() {
        let crawl = MotionProfile::new(0.0, 1e-6, 1e-6, 1e-6).unwrap();
        let result = FlyScanConfig::builder(zone(), crawl)
            .acquisition_rate_hz(MAX_FLY_RATE_HZ)
            .build();
        assert!(matches!(result, Err(ScanError::Configuration(_))));
    }

    #[test]
    fn required_rate_follows_gap() {
        // 10 mm/s over a 0.5 mm gap
        assert!((config(100.0, 0.5).required_minimum_rate_hz() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn compatible_capability_passes() {
        let result = config(100.0, 0.5).validate_with_capability(&capability(150.0, 5.0));
        assert!(result.is_valid(), "{result:?}");
        assert!(result.warnings.is_empty(), "{result:?}");
    }

    #[test]
    fn slow_detector_is_rejected() {
        let fast = MotionProfile::new(1.0, 100.0, 50.0, 50.0).unwrap();
        let config = FlyScanConfig::builder(zone(), fast)
            .points(10, 10)
            .acquisition_rate_hz(50.0)
            .max_spatial_gap_mm(0.1)
            .build()
            .unwrap();
        let result = config.validate_with_capability(&capability(50.0, 5.0));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("cannot achieve required rate"));
    }

    #[test]
    fn requested_rate_above_measured_is_rejected() {
        let result = config(200.0, 0.5).validate_with_capability(&capability(150.0, 1.0));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("exceeds measured"));
    }

    #[test]
    fn stale_and_unstable_measurements_warn() {
        let cap = capability(150.0, 15.0)
            .with_measured_at(Utc::now() - chrono::Duration::hours(1));
        let result = config(100.0, 0.5).validate_with_capability(&cap);
        assert!(result.is_valid(), "{result:?}");
        assert_eq!(result.warnings.len(), 2, "{result:?}");
    }

    #[test]
    fn plan_uses_one_profile() {
        let config = config(100.0, 0.5);
        let motions = config.plan_motions().unwrap();
        assert_eq!(motions.len(), config.total_grid_points() - 1);
        assert!(motions.iter().all(|m| *m.motion_profile() == profile()));
    }

    #[test]
    fn aggregate_lifecycle() {
        let config = FlyScanConfig::builder(ScanZone::new(0.0, 10.0, 0.0, 10.0).unwrap(), profile())
            .acquisition_rate_hz(10.0)
            .build()
            .unwrap();
        let mut scan = FlyScan::new(config).unwrap();
        let expected: usize = scan.motions().iter().map(|m| m.sample_count(10.0)).sum();
        assert_eq!(scan.expected_points(), expected);
        assert!(scan.estimated_duration() > Duration::ZERO);

        let sample = ScanPointResult {
            position: Position2D::default(),
            measurement: Measurement::raw([0.0; 6]),
            point_index: 0,
        };
        assert!(scan.add_result(sample.clone()).is_err());
        scan.start().unwrap();
        scan.add_result(sample.clone()).unwrap();
        assert_eq!(scan.progress().current, 1);
        scan.pause().unwrap();
        assert!(scan.add_result(sample).is_err());
        scan.resume().unwrap();
        scan.complete().unwrap();
        assert_eq!(scan.status(), ScanStatus::Completed);
        assert!(scan.cancel().is_err());
    }
}
