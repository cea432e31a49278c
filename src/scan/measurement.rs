//! Lock-in voltage measurements and their aggregation.

use crate::error::{AppResult, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of lock-in channels per sample.
pub const CHANNEL_COUNT: usize = 6;

/// Lock-in output channel: field component and phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// X component, in phase
    XInPhase,
    /// X component, quadrature
    XQuadrature,
    /// Y component, in phase
    YInPhase,
    /// Y component, quadrature
    YQuadrature,
    /// Z component, in phase
    ZInPhase,
    /// Z component, quadrature
    ZQuadrature,
}

impl Channel {
    /// Index into [`Measurement::values`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::XInPhase => "x_in_phase",
            Channel::XQuadrature => "x_quadrature",
            Channel::YInPhase => "y_in_phase",
            Channel::YQuadrature => "y_quadrature",
            Channel::ZInPhase => "z_in_phase",
            Channel::ZQuadrature => "z_quadrature",
        };
        f.write_str(name)
    }
}

/// A voltage sample, raw or averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// When the sample (or the last averaged sample) was taken.
    pub timestamp: DateTime<Utc>,
    /// Channel voltages (V), indexed by [`Channel::index`].
    pub values: [f64; CHANNEL_COUNT],
    /// Per-channel sample standard deviation, present for averaged values.
    pub std_dev: Option<[f64; CHANNEL_COUNT]>,
    /// Estimated uncertainty of the mean (V).
    pub uncertainty_estimate_volts: Option<f64>,
    /// Number of raw samples behind this value.
    pub sample_count: usize,
}

impl Measurement {
    /// Single raw sample taken now.
    pub fn raw(values: [f64; CHANNEL_COUNT]) -> Self {
        Self {
            timestamp: Utc::now(),
            values,
            std_dev: None,
            uncertainty_estimate_volts: None,
            sample_count: 1,
        }
    }

    /// Voltage on `channel`.
    pub fn value(&self, channel: Channel) -> f64 {
        self.values[channel.index()]
    }

    /// Magnitude of the in-phase vector.
    pub fn in_phase_magnitude(&self) -> f64 {
        let x = self.value(Channel::XInPhase);
        let y = self.value(Channel::YInPhase);
        let z = self.value(Channel::ZInPhase);
        (x * x + y * y + z * z).sqrt()
    }
}

/// Mean and spread of a batch of raw samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementStatistics {
    /// Per-channel mean.
    pub mean: [f64; CHANNEL_COUNT],
    /// Per-channel sample standard deviation (n - 1). Zero for a single sample.
    pub std_dev: [f64; CHANNEL_COUNT],
    /// Number of samples.
    pub count: usize,
}

impl MeasurementStatistics {
    /// Compute statistics. Fails on an empty batch.
    pub fn from_samples(samples: &[Measurement]) -> AppResult<Self> {
        if samples.is_empty() {
            return Err(ScanError::Acquisition(
                "Cannot compute statistics of zero samples".to_string(),
            ));
        }
        let n = samples.len() as f64;
        let mut mean = [0.0; CHANNEL_COUNT];
        for sample in samples {
            for (acc, value) in mean.iter_mut().zip(sample.values) {
                *acc += value;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut std_dev = [0.0; CHANNEL_COUNT];
        if samples.len() > 1 {
            for sample in samples {
                for ((acc, value), m) in std_dev.iter_mut().zip(sample.values).zip(mean) {
                    *acc += (value - m).powi(2);
                }
            }
            std_dev.iter_mut().for_each(|s| *s = (*s / (n - 1.0)).sqrt());
        }

        Ok(Self {
            mean,
            std_dev,
            count: samples.len(),
        })
    }

    /// Uncertainty of the mean: worst-channel standard error combined with
    /// the device quantification noise, which averages down as 1/sqrt(n).
    pub fn uncertainty_volts(&self, quantification_noise: f64) -> f64 {
        let n = self.count as f64;
        let worst = self.std_dev.iter().copied().fold(0.0_f64, f64::max);
        let standard_error = worst / n.sqrt();
        let quantification = quantification_noise / n.sqrt();
        standard_error.hypot(quantification)
    }

    /// Collapse into an averaged [`Measurement`].
    pub fn into_measurement(self, timestamp: DateTime<Utc>, quantification_noise: f64) -> Measurement {
        let uncertainty = self.uncertainty_volts(quantification_noise);
        Measurement {
            timestamp,
            values: self.mean,
            std_dev: Some(self.std_dev),
            uncertainty_estimate_volts: Some(uncertainty),
            sample_count: self.count,
        }
    }
}

/// Average a batch of raw samples into one measurement.
pub fn aggregate(samples: &[Measurement], quantification_noise: f64) -> AppResult<Measurement> {
    let stats = MeasurementStatistics::from_samples(samples)?;
    let timestamp = samples
        .last()
        .map(|s| s.timestamp)
        .unwrap_or_else(Utc::now);
    Ok(stats.into_measurement(timestamp, quantification_noise))
}
