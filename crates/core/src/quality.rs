//! Trajectory quality scoring.
//!
//! Computes smoothness (jerk), path efficiency, high-frequency jitter,
//! hesitation and correction counts, and folds them into a 1-5 score plus
//! a set of quality flags.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kinematics::{differentiate, distance, dot, norm, rms, runs_where, time_deltas, velocities};
use crate::spectrum::{estimate_sample_rate, periodogram};
use crate::trajectory::{validate_dimensions, TrajectoryPoint};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fewer samples than this yields the neutral result.
pub const MIN_POINTS_FOR_ANALYSIS: usize = 3;

/// Score reported for trajectories too short to analyze.
pub const NEUTRAL_SCORE: u8 = 3;

/// Smoothness below this flags the trajectory as jittery.
pub const JITTERY_SMOOTHNESS_THRESHOLD: f64 = 0.5;

/// Jitter above this flags the trajectory as jittery.
pub const JITTERY_JITTER_THRESHOLD: f64 = 1.0;

/// More hesitations than this raise the `hesitation` flag.
pub const HESITATION_FLAG_THRESHOLD: u32 = 3;

/// More corrections than this raise the `correction-heavy` flag.
pub const CORRECTION_FLAG_THRESHOLD: u32 = 5;

const WEIGHT_SMOOTHNESS: f64 = 0.30;
const WEIGHT_EFFICIENCY: f64 = 0.25;
const WEIGHT_JITTER: f64 = 0.25;
const WEIGHT_HESITATION: f64 = 0.10;
const WEIGHT_CORRECTION: f64 = 0.10;

/// Hesitation count at which the hesitation term reaches zero.
const HESITATION_SCORE_SPAN: f64 = 10.0;

/// Correction count at which the correction term reaches zero.
const CORRECTION_SCORE_SPAN: f64 = 20.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Enumerated quality problems. Independent and non-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityFlag {
    Jittery,
    Hesitation,
    CorrectionHeavy,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jittery => "jittery",
            Self::Hesitation => "hesitation",
            Self::CorrectionHeavy => "correction-heavy",
        }
    }
}

/// Derived quality metrics for one trajectory. Never persisted with the
/// episode itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    /// `(0, 1]`, 1 = no jerk.
    pub smoothness: f64,
    /// `[0, 1]`, 1 = straight line.
    pub efficiency: f64,
    /// `>= 0`, velocity power above the jitter cutoff.
    pub jitter: f64,
    pub hesitation_count: u32,
    pub correction_count: u32,
    /// `1..=5`.
    pub overall_score: u8,
    pub flags: BTreeSet<QualityFlag>,
}

impl TrajectoryMetrics {
    /// The defined result for trajectories with fewer than
    /// [`MIN_POINTS_FOR_ANALYSIS`] samples.
    pub fn neutral() -> Self {
        Self {
            smoothness: 1.0,
            efficiency: 1.0,
            jitter: 0.0,
            hesitation_count: 0,
            correction_count: 0,
            overall_score: NEUTRAL_SCORE,
            flags: BTreeSet::new(),
        }
    }
}

/// Tunable thresholds for the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Velocity power above this frequency counts as jitter (Hz).
    pub jitter_cutoff_hz: f64,
    /// Velocity magnitude below which a sample counts as hesitating.
    pub hesitation_velocity_threshold: f64,
    /// Minimum run of hesitating samples to count as one hesitation.
    pub hesitation_min_samples: usize,
    /// Normalized direction dot product below which a pair is a correction.
    pub correction_dot_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            jitter_cutoff_hz: 10.0,
            hesitation_velocity_threshold: 0.01,
            hesitation_min_samples: 5,
            correction_dot_threshold: -0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Stateless analyzer; cheap to construct and safe to share across workers.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryQualityAnalyzer {
    config: QualityConfig,
}

impl TrajectoryQualityAnalyzer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Analyze a trajectory.
    ///
    /// Fails only when vector dimensions differ between samples.
    pub fn analyze(&self, points: &[TrajectoryPoint]) -> Result<TrajectoryMetrics, CoreError> {
        validate_dimensions(points)?;

        if points.len() < MIN_POINTS_FOR_ANALYSIS {
            return Ok(TrajectoryMetrics::neutral());
        }

        let dt = time_deltas(points);
        let velocity = velocities(points, &dt);
        let acceleration = differentiate(&velocity, &dt[1..]);
        let jerk = differentiate(&acceleration, &dt[2..]);

        let speed: Vec<f64> = velocity.iter().map(|v| norm(v)).collect();
        let jerk_magnitude: Vec<f64> = jerk.iter().map(|j| norm(j)).collect();

        let smoothness = 1.0 / (1.0 + rms(&jerk_magnitude));
        let efficiency = path_efficiency(points);
        let jitter = periodogram(&speed, estimate_sample_rate(&dt)).power_above(self.config.jitter_cutoff_hz);
        let hesitation_count = self.count_hesitations(&speed);
        let correction_count = self.count_corrections(&velocity);

        let flags = quality_flags(smoothness, jitter, hesitation_count, correction_count);
        let overall_score =
            overall_score(smoothness, efficiency, jitter, hesitation_count, correction_count);

        Ok(TrajectoryMetrics {
            smoothness,
            efficiency,
            jitter,
            hesitation_count,
            correction_count,
            overall_score,
            flags,
        })
    }

    fn count_hesitations(&self, speed: &[f64]) -> u32 {
        let threshold = self.config.hesitation_velocity_threshold;
        runs_where(speed, |v| v < threshold)
            .into_iter()
            .filter(|(start, end)| end - start >= self.config.hesitation_min_samples)
            .count() as u32
    }

    fn count_corrections(&self, velocity: &[Vec<f64>]) -> u32 {
        velocity
            .windows(2)
            .filter(|w| {
                let (na, nb) = (norm(&w[0]), norm(&w[1]));
                if na <= f64::EPSILON || nb <= f64::EPSILON {
                    return false;
                }
                dot(&w[0], &w[1]) / (na * nb) < self.config.correction_dot_threshold
            })
            .count() as u32
    }
}

/// Analyze with the default configuration.
pub fn analyze_trajectory(points: &[TrajectoryPoint]) -> Result<TrajectoryMetrics, CoreError> {
    TrajectoryQualityAnalyzer::default().analyze(points)
}

/// Straight-line distance over travelled distance, clamped to `[0, 1]`.
///
/// A zero-length path is treated as perfectly efficient.
pub fn path_efficiency(points: &[TrajectoryPoint]) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 1.0;
    };

    let travelled: f64 = points
        .windows(2)
        .map(|w| distance(&w[0].joint_positions, &w[1].joint_positions))
        .sum();
    if travelled <= f64::EPSILON {
        return 1.0;
    }

    (distance(&first.joint_positions, &last.joint_positions) / travelled).clamp(0.0, 1.0)
}

/// Flags raised by the given metric values.
pub fn quality_flags(
    smoothness: f64,
    jitter: f64,
    hesitation_count: u32,
    correction_count: u32,
) -> BTreeSet<QualityFlag> {
    let mut flags = BTreeSet::new();
    if smoothness < JITTERY_SMOOTHNESS_THRESHOLD || jitter > JITTERY_JITTER_THRESHOLD {
        flags.insert(QualityFlag::Jittery);
    }
    if hesitation_count > HESITATION_FLAG_THRESHOLD {
        flags.insert(QualityFlag::Hesitation);
    }
    if correction_count > CORRECTION_FLAG_THRESHOLD {
        flags.insert(QualityFlag::CorrectionHeavy);
    }
    flags
}

/// Weighted 1-5 score. Non-finite inputs score the minimum.
pub fn overall_score(
    smoothness: f64,
    efficiency: f64,
    jitter: f64,
    hesitation_count: u32,
    correction_count: u32,
) -> u8 {
    let weighted = smoothness * WEIGHT_SMOOTHNESS
        + efficiency * WEIGHT_EFFICIENCY
        + (1.0 - jitter.min(1.0)) * WEIGHT_JITTER
        + (1.0 - hesitation_count as f64 / HESITATION_SCORE_SPAN).max(0.0) * WEIGHT_HESITATION
        + (1.0 - correction_count as f64 / CORRECTION_SCORE_SPAN).max(0.0) * WEIGHT_CORRECTION;
    if !weighted.is_finite() {
        return 1;
    }

    (5.0 * weighted).round().clamp(1.0, 5.0) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::tests::point;
    use assert_matches::assert_matches;

    /// Points at a fixed interval following the given 1-D positions.
    fn line(dt: f64, positions: &[f64]) -> Vec<TrajectoryPoint> {
        positions
            .iter()
            .enumerate()
            .map(|(i, &p)| point(i as f64 * dt, i, &[p]))
            .collect()
    }

    // -- degenerate inputs ----------------------------------------------------

    #[test]
    fn short_trajectories_are_neutral() {
        assert_eq!(analyze_trajectory(&[]).unwrap(), TrajectoryMetrics::neutral());
        assert_eq!(
            analyze_trajectory(&[point(0.0, 0, &[0.0])]).unwrap(),
            TrajectoryMetrics::neutral()
        );
        let two = line(0.1, &[0.0, 5.0]);
        let m = analyze_trajectory(&two).unwrap();
        assert_eq!(m.overall_score, 3);
        assert_eq!(m.smoothness, 1.0);
        assert_eq!(m.efficiency, 1.0);
        assert!(m.flags.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let pts = vec![point(0.0, 0, &[0.0, 0.0]), point(0.1, 1, &[1.0]), point(0.2, 2, &[2.0])];
        assert_matches!(analyze_trajectory(&pts), Err(CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn non_finite_sample_is_an_error() {
        let mut pts = line(0.1, &[0.0, 0.1, 0.2, 0.3]);
        pts[1].joint_positions[0] = f64::NAN;
        let err = analyze_trajectory(&pts).unwrap_err();
        assert_matches!(err, CoreError::NonFinite { field: "joint_positions", index: 1 });
        assert!(err.is_data_integrity());
    }

    #[test]
    fn duplicate_timestamps_are_tolerated() {
        let pts = vec![
            point(0.0, 0, &[0.0]),
            point(0.1, 1, &[0.1]),
            point(0.1, 2, &[0.2]),
            point(0.3, 3, &[0.3]),
        ];
        let m = analyze_trajectory(&pts).unwrap();
        assert!((1..=5).contains(&m.overall_score));
        assert!(m.smoothness > 0.0 && m.smoothness <= 1.0);
    }

    // -- scenarios ------------------------------------------------------------

    #[test]
    fn three_point_diagonal_scenario() {
        let pts = vec![
            point(0.0, 0, &[0.0, 0.0, 0.0]),
            point(0.1, 1, &[1.0, 1.0, 1.0]),
            point(0.2, 2, &[2.0, 2.0, 2.0]),
        ];
        let m = analyze_trajectory(&pts).unwrap();
        assert!(m.smoothness > 0.9);
        assert!(m.efficiency > 0.9);
        assert_eq!(m.hesitation_count, 0);
        assert_eq!(m.correction_count, 0);
        assert!(m.overall_score >= 4);
    }

    #[test]
    fn straight_constant_velocity_is_efficient() {
        let positions: Vec<f64> = (0..50).map(|i| i as f64 * 0.5).collect();
        let m = analyze_trajectory(&line(0.02, &positions)).unwrap();
        assert!((m.efficiency - 1.0).abs() < 1e-12);
        assert_eq!(m.hesitation_count, 0);
        assert_eq!(m.correction_count, 0);
        assert!(m.jitter < 1e-9);
        assert_eq!(m.overall_score, 5);
    }

    // -- hesitation boundary --------------------------------------------------

    /// Moving, then `still` segments with no motion, then moving again.
    fn with_pause(still: usize) -> Vec<TrajectoryPoint> {
        let mut positions = vec![0.0, 1.0, 2.0];
        let hold = *positions.last().unwrap();
        positions.extend(std::iter::repeat(hold).take(still));
        positions.extend([3.0, 4.0, 5.0]);
        line(0.1, &positions)
    }

    #[test]
    fn five_still_samples_count_as_hesitation() {
        // Five repeated positions after the last moving one give five zero-speed segments.
        let m = analyze_trajectory(&with_pause(5)).unwrap();
        assert_eq!(m.hesitation_count, 1);
    }

    #[test]
    fn four_still_samples_do_not_count() {
        let m = analyze_trajectory(&with_pause(4)).unwrap();
        assert_eq!(m.hesitation_count, 0);
    }

    // -- corrections / efficiency --------------------------------------------

    #[test]
    fn back_and_forth_counts_corrections() {
        let m = analyze_trajectory(&line(0.1, &[0.0, 1.0, 0.0, 1.0, 0.0])).unwrap();
        assert_eq!(m.correction_count, 3);
        assert!(m.efficiency < 0.01);
    }

    #[test]
    fn right_angle_turn_is_not_a_correction() {
        let pts = vec![
            point(0.0, 0, &[0.0, 0.0]),
            point(0.1, 1, &[1.0, 0.0]),
            point(0.2, 2, &[1.0, 1.0]),
        ];
        let m = analyze_trajectory(&pts).unwrap();
        assert_eq!(m.correction_count, 0);
        assert!((m.efficiency - 2f64.sqrt() / 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_length_path_is_efficient() {
        assert_eq!(path_efficiency(&line(0.1, &[1.0, 1.0, 1.0])), 1.0);
    }

    // -- flags / score --------------------------------------------------------

    #[test]
    fn flags_follow_thresholds() {
        assert!(quality_flags(0.9, 0.0, 0, 0).is_empty());
        assert!(quality_flags(0.4, 0.0, 0, 0).contains(&QualityFlag::Jittery));
        assert!(quality_flags(0.9, 1.5, 0, 0).contains(&QualityFlag::Jittery));
        assert!(quality_flags(0.9, 0.0, 4, 0).contains(&QualityFlag::Hesitation));
        assert!(!quality_flags(0.9, 0.0, 3, 0).contains(&QualityFlag::Hesitation));
        assert!(quality_flags(0.9, 0.0, 0, 6).contains(&QualityFlag::CorrectionHeavy));
        assert!(!quality_flags(0.9, 0.0, 0, 5).contains(&QualityFlag::CorrectionHeavy));
        assert_eq!(quality_flags(0.1, 2.0, 9, 9).len(), 3);
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(overall_score(1.0, 1.0, 0.0, 0, 0), 5);
        assert_eq!(overall_score(0.0, 0.0, 5.0, 50, 50), 1);
        // 5 * (0.24 + 0.2 + 0.2 + 0.1 + 0.1) = 4.2
        assert_eq!(overall_score(0.8, 0.8, 0.2, 0, 0), 4);
        // Hesitation and correction terms bottom out at zero.
        assert_eq!(overall_score(1.0, 1.0, 0.0, 100, 100), 4);
    }

    #[test]
    fn score_stays_in_range_for_nan_inputs() {
        assert_eq!(overall_score(f64::NAN, 1.0, 0.0, 0, 0), 1);
        assert_eq!(overall_score(1.0, 1.0, f64::NAN, 0, 0), 1);
        assert_eq!(overall_score(1.0, f64::INFINITY, 0.0, 0, 0), 1);
    }

    #[test]
    fn flags_serialize_kebab_case() {
        let json = serde_json::to_string(&QualityFlag::CorrectionHeavy).unwrap();
        assert_eq!(json, "\"correction-heavy\"");
        assert_eq!(QualityFlag::CorrectionHeavy.as_str(), "correction-heavy");
    }
}
