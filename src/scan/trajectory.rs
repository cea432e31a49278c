//! Trajectory generation.
//!
//! [`ScanTrajectoryFactory`] turns a [`StepScanConfig`] into the ordered list
//! of grid points to visit and the [`AtomicMotion`] segments between them.

use super::config::{Position2D, ScanPattern, ScanZone, StepScanConfig};
use super::motion::{AtomicMotion, MotionProfileSelector};
use crate::error::AppResult;
use serde::Serialize;
use std::time::Duration;

/// Ordered, immutable sequence of scan points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanTrajectory {
    points: Vec<Position2D>,
}

impl ScanTrajectory {
    /// Wrap an ordered list of points.
    pub fn new(points: Vec<Position2D>) -> Self {
        Self { points }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the trajectory has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point at `index`.
    pub fn get(&self, index: usize) -> Option<Position2D> {
        self.points.get(index).copied()
    }

    /// Iterate the points in visiting order. Can be called any number of times.
    pub fn iter(&self) -> impl Iterator<Item = &Position2D> + '_ {
        self.points.iter()
    }

    /// Points as a slice.
    pub fn points(&self) -> &[Position2D] {
        &self.points
    }

    /// Sum of straight-line distances between consecutive points (mm).
    pub fn total_travel_distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }
}

impl<'a> IntoIterator for &'a ScanTrajectory {
    type Item = &'a Position2D;
    type IntoIter = std::slice::Iter<'a, Position2D>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Builds trajectories and motion plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanTrajectoryFactory;

impl ScanTrajectoryFactory {
    /// Grid of `x_nb_points * y_nb_points` positions ordered by the pattern.
    pub fn create_trajectory(config: &StepScanConfig) -> ScanTrajectory {
        Self::grid(
            config.zone(),
            config.x_nb_points(),
            config.y_nb_points(),
            config.pattern(),
        )
    }

    /// Evenly spaced grid over `zone`, both edges included.
    pub fn grid(
        zone: &ScanZone,
        x_nb_points: usize,
        y_nb_points: usize,
        pattern: ScanPattern,
    ) -> ScanTrajectory {
        let xs = axis_positions(zone.x_min(), zone.x_max(), x_nb_points);
        let ys = axis_positions(zone.y_min(), zone.y_max(), y_nb_points);

        let mut points = Vec::with_capacity(xs.len().saturating_mul(ys.len()));
        match pattern {
            ScanPattern::Raster => {
                for &y in &ys {
                    points.extend(xs.iter().map(|&x| Position2D::new(x, y)));
                }
            }
            ScanPattern::Serpentine => {
                for (row, &y) in ys.iter().enumerate() {
                    if row % 2 == 0 {
                        points.extend(xs.iter().map(|&x| Position2D::new(x, y)));
                    } else {
                        points.extend(xs.iter().rev().map(|&x| Position2D::new(x, y)));
                    }
                }
            }
            ScanPattern::Comb => {
                for &x in &xs {
                    points.extend(ys.iter().map(|&y| Position2D::new(x, y)));
                }
            }
        }

        ScanTrajectory::new(points)
    }

    /// One motion per consecutive pair of positions, profiled by distance.
    ///
    /// Fewer than two positions produce no motions.
    pub fn create_motions(
        positions: &[Position2D],
        selector: &MotionProfileSelector,
    ) -> AppResult<Vec<AtomicMotion>> {
        positions
            .windows(2)
            .map(|pair| {
                let dx = pair[1].x - pair[0].x;
                let dy = pair[1].y - pair[0].y;
                let profile = selector.select_for_distance(dx.hypot(dy));
                AtomicMotion::new(dx, dy, profile)
            })
            .collect()
    }

    /// Whole-scan estimate: dwell time per point plus planned motion time.
    pub fn estimate_scan_duration(config: &StepScanConfig, motions: &[AtomicMotion]) -> Duration {
        let motion_seconds: f64 = motions
            .iter()
            .map(AtomicMotion::estimated_duration_seconds)
            .sum();
        let motion = Duration::try_from_secs_f64(motion_seconds.max(0.0)).unwrap_or(Duration::MAX);
        config.estimated_duration().saturating_add(motion)
    }
}

fn axis_positions(min: f64, max: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![min];
    }
    let step = (max - min) / (count - 1) as f64;
    (0..count)
        .map(|i| if i == count - 1 { max } else { min + step * i as f64 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern: ScanPattern, nx: usize, ny: usize) -> StepScanConfig {
        let zone = ScanZone::new(0.0, 10.0, 0.0, 20.0).unwrap();
        StepScanConfig::builder(zone)
            .points(nx, ny)
            .pattern(pattern)
            .build()
            .unwrap()
    }

    #[test]
    fn raster_keeps_x_direction() {
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config(ScanPattern::Raster, 3, 2));
        let xs: Vec<f64> = trajectory.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 5.0, 10.0, 0.0, 5.0, 10.0]);
        assert_eq!(trajectory.get(3), Some(Position2D::new(0.0, 20.0)));
    }

    #[test]
    fn serpentine_reverses_odd_rows() {
        let trajectory =
            ScanTrajectoryFactory::create_trajectory(&config(ScanPattern::Serpentine, 3, 2));
        let xs: Vec<f64> = trajectory.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 5.0, 10.0, 10.0, 5.0, 0.0]);
    }

    #[test]
    fn comb_sweeps_y_per_column() {
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config(ScanPattern::Comb, 2, 3));
        let points: Vec<(f64, f64)> = trajectory.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            points,
            vec![(0.0, 0.0), (0.0, 10.0), (0.0, 20.0), (10.0, 0.0), (10.0, 10.0), (10.0, 20.0)]
        );
    }

    #[test]
    fn single_point_axes_sit_at_min() {
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config(ScanPattern::Raster, 1, 1));
        assert_eq!(trajectory.points(), &[Position2D::new(0.0, 0.0)]);
    }

    #[test]
    fn motions_between_consecutive_points() {
        let trajectory = ScanTrajectoryFactory::create_trajectory(&config(ScanPattern::Raster, 3, 1));
        let motions = ScanTrajectoryFactory::create_motions(
            trajectory.points(),
            &MotionProfileSelector::default(),
        )
        .unwrap();
        assert_eq!(motions.len(), 2);
        assert!(motions.iter().all(|m| m.dx() == 5.0 && m.dy() == 0.0));

        let none = ScanTrajectoryFactory::create_motions(
            &[Position2D::new(1.0, 1.0)],
            &MotionProfileSelector::default(),
        )
        .unwrap();
        assert!(none.is_empty());
    }
}
