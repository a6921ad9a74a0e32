//! Statistical anomaly detection over the kinematic stream.
//!
//! Detected anomalies are independent findings: overlapping anomalies at
//! the same frame are legal and never merged. The detector never marks an
//! anomaly as verified; that is a human action ([`Anomaly::verify`]).

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kinematics::{norm, runs_where, velocity_magnitudes};
use crate::trajectory::{validate_dimensions, TrajectoryPoint};
use crate::types::FrameIndex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyType {
    VelocitySpike,
    ForceSpike,
    UnexpectedStop,
    Collision,
    DroppedObject,
    GripperFailure,
    Other,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VelocitySpike => "velocity-spike",
            Self::ForceSpike => "force-spike",
            Self::UnexpectedStop => "unexpected-stop",
            Self::Collision => "collision",
            Self::DroppedObject => "dropped-object",
            Self::GripperFailure => "gripper-failure",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A flagged span of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// Inclusive `[start, end]`.
    pub frame_range: (FrameIndex, FrameIndex),
    /// Seconds matching `frame_range`.
    pub timestamp_range: (f64, f64),
    pub description: String,
    pub auto_detected: bool,
    pub verified: bool,
}

impl Anomaly {
    /// Detected ids are derived from the type and the sample span, so the
    /// same input always yields the same anomalies.
    fn detected(
        anomaly_type: AnomalyType,
        severity: Severity,
        samples: (usize, usize),
        points: &[TrajectoryPoint],
        description: String,
    ) -> Self {
        let (first, last) = (&points[samples.0], &points[samples.1]);
        Self {
            id: format!("{}-{}-{}", anomaly_type.as_str(), samples.0, samples.1),
            anomaly_type,
            severity,
            frame_range: (first.frame, last.frame),
            timestamp_range: (first.timestamp, last.timestamp),
            description,
            auto_detected: true,
            verified: false,
        }
    }

    /// Create an anomaly entered by an annotator, with a random id.
    pub fn manual(
        anomaly_type: AnomalyType,
        severity: Severity,
        frame_range: (FrameIndex, FrameIndex),
        timestamp_range: (f64, f64),
        description: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let anomaly = Self {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_type,
            severity,
            frame_range,
            timestamp_range,
            description: description.into(),
            auto_detected: false,
            verified: false,
        };
        validate_anomaly(&anomaly)?;
        Ok(anomaly)
    }

    /// Mark as confirmed by a human reviewer.
    pub fn verify(&mut self) {
        self.verified = true;
    }
}

/// Validate range ordering of an anomaly.
pub fn validate_anomaly(anomaly: &Anomaly) -> Result<(), CoreError> {
    let (start, end) = anomaly.frame_range;
    if start > end {
        return Err(CoreError::Validation(format!(
            "anomaly frame_range start ({start}) must be <= end ({end})"
        )));
    }
    let (t0, t1) = anomaly.timestamp_range;
    if !t0.is_finite() || !t1.is_finite() {
        return Err(CoreError::Validation(
            "anomaly timestamp_range must be finite".to_string(),
        ));
    }
    if t0 > t1 {
        return Err(CoreError::Validation(format!(
            "anomaly timestamp_range start ({t0}) must be <= end ({t1})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Lower bound on the standard deviation used for z-scores, so a single
/// outlier among identical values still scores as extreme.
const MIN_STD_DEV: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// `|z|` above this is a spike.
    pub z_threshold: f64,
    /// Velocity magnitude below which the robot is considered stopped.
    pub stop_velocity_threshold: f64,
    /// Minimum stationary duration reported as an unexpected stop (seconds).
    pub stop_min_duration_secs: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            stop_velocity_threshold: 0.01,
            stop_min_duration_secs: 1.0,
        }
    }
}

/// Stateless detector over a trajectory and an optional force/torque stream.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Run every check. `forces`, when given, must have one sample per
    /// trajectory point and a consistent width.
    pub fn detect(
        &self,
        points: &[TrajectoryPoint],
        forces: Option<&[Vec<f64>]>,
    ) -> Result<Vec<Anomaly>, CoreError> {
        validate_dimensions(points)?;
        if let Some(forces) = forces {
            validate_forces(forces, points.len())?;
        }

        let speed = velocity_magnitudes(points);
        let mut anomalies = self.velocity_spikes(points, &speed);
        if let Some(forces) = forces {
            anomalies.extend(self.force_spikes(points, forces));
        }
        anomalies.extend(self.unexpected_stops(points, &speed));
        Ok(anomalies)
    }

    fn velocity_spikes(&self, points: &[TrajectoryPoint], speed: &[f64]) -> Vec<Anomaly> {
        zscore_outliers(speed, self.config.z_threshold)
            .into_iter()
            .map(|(i, z)| {
                Anomaly::detected(
                    AnomalyType::VelocitySpike,
                    Severity::Medium,
                    (i, i),
                    points,
                    format!("Velocity spike: z-score {z:.2} (magnitude {:.4})", speed[i]),
                )
            })
            .collect()
    }

    fn force_spikes(&self, points: &[TrajectoryPoint], forces: &[Vec<f64>]) -> Vec<Anomaly> {
        let magnitude: Vec<f64> = forces.iter().map(|f| norm(f)).collect();
        zscore_outliers(&magnitude, self.config.z_threshold)
            .into_iter()
            .map(|(i, z)| {
                Anomaly::detected(
                    AnomalyType::ForceSpike,
                    Severity::Medium,
                    (i, i),
                    points,
                    format!("Force spike: z-score {z:.2} (magnitude {:.4})", magnitude[i]),
                )
            })
            .collect()
    }

    /// Stationary runs in the middle of the episode. Runs touching the first
    /// or last segment are the robot idling before start or after completion.
    fn unexpected_stops(&self, points: &[TrajectoryPoint], speed: &[f64]) -> Vec<Anomaly> {
        let threshold = self.config.stop_velocity_threshold;
        runs_where(speed, |v| v < threshold)
            .into_iter()
            .filter(|&(start, end)| start > 0 && end < speed.len())
            .filter_map(|(start, end)| {
                // Segments start..end span points start..=end.
                let duration = points[end].timestamp - points[start].timestamp;
                (duration >= self.config.stop_min_duration_secs).then(|| {
                    Anomaly::detected(
                        AnomalyType::UnexpectedStop,
                        Severity::Low,
                        (start, end),
                        points,
                        format!("Robot stationary for {duration:.2}s"),
                    )
                })
            })
            .collect()
    }
}

/// Detect with the default configuration.
pub fn detect_anomalies(
    points: &[TrajectoryPoint],
    forces: Option<&[Vec<f64>]>,
) -> Result<Vec<Anomaly>, CoreError> {
    AnomalyDetector::default().detect(points, forces)
}

fn validate_forces(forces: &[Vec<f64>], expected_len: usize) -> Result<(), CoreError> {
    if forces.len() != expected_len {
        return Err(CoreError::LengthMismatch {
            what: "force stream".to_string(),
            expected: expected_len,
            actual: forces.len(),
        });
    }
    let Some(width) = forces.first().map(Vec::len) else {
        return Ok(());
    };
    for (index, f) in forces.iter().enumerate() {
        if f.len() != width {
            return Err(CoreError::DimensionMismatch {
                field: "force",
                index,
                expected: width,
                actual: f.len(),
            });
        }
    }
    Ok(())
}

/// Indices whose z-score exceeds `threshold` in absolute value, with the
/// z-score.
///
/// Each value is scored against the mean and population standard deviation
/// of the *other* values. Against the full population a single outlier can
/// never exceed `sqrt(n - 1)`, which would hide spikes in short streams.
pub fn zscore_outliers(values: &[f64], threshold: f64) -> Vec<(usize, f64)> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }

    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let m2: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();

    values
        .iter()
        .enumerate()
        .filter_map(|(i, &x)| {
            let others_mean = (nf * mean - x) / (nf - 1.0);
            let others_m2 = (m2 - (x - mean) * (x - others_mean)).max(0.0);
            let std = (others_m2 / (nf - 1.0)).sqrt().max(MIN_STD_DEV);
            let z = (x - others_mean) / std;
            (z.abs() > threshold).then_some((i, z))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::tests::point;
    use assert_matches::assert_matches;

    /// One-dimensional trajectory at 1 s spacing whose segment speeds equal
    /// `speeds`.
    fn from_speeds(speeds: &[f64]) -> Vec<TrajectoryPoint> {
        let mut pos = 0.0;
        let mut pts = vec![point(0.0, 0, &[pos])];
        for (i, s) in speeds.iter().enumerate() {
            pos += s;
            pts.push(point((i + 1) as f64, i + 1, &[pos]));
        }
        pts
    }

    #[test]
    fn zscore_single_outlier() {
        let out = zscore_outliers(&[0.01, 0.01, 0.01, 5.0, 0.01, 0.01], 3.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 3);
        assert!(out[0].1 > 3.0);
    }

    #[test]
    fn zscore_needs_three_values() {
        assert!(zscore_outliers(&[0.0, 100.0], 3.0).is_empty());
    }

    #[test]
    fn zscore_uniform_values_have_no_outliers() {
        assert!(zscore_outliers(&[2.0; 20], 3.0).is_empty());
    }

    #[test]
    fn velocity_spike_scenario() {
        let pts = from_speeds(&[0.01, 0.01, 0.01, 5.0, 0.01, 0.01]);
        let found = detect_anomalies(&pts, None).unwrap();
        let spikes: Vec<_> = found
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::VelocitySpike)
            .collect();
        assert_eq!(spikes.len(), 1);
        let spike = spikes[0];
        assert_eq!(spike.frame_range, (3, 3));
        assert_eq!(spike.severity, Severity::Medium);
        assert!(spike.auto_detected);
        assert!(!spike.verified);
        assert!(spike.description.contains("z-score"));
    }

    #[test]
    fn smooth_motion_has_no_anomalies() {
        let pts = from_speeds(&[1.0; 30]);
        assert!(detect_anomalies(&pts, None).unwrap().is_empty());
    }

    #[test]
    fn force_spike_detected() {
        let pts = from_speeds(&[1.0; 9]);
        let mut forces = vec![vec![1.0, 0.0, 0.0]; 10];
        forces[6] = vec![40.0, 30.0, 0.0];
        let found = detect_anomalies(&pts, Some(&forces)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anomaly_type, AnomalyType::ForceSpike);
        assert_eq!(found[0].frame_range, (6, 6));
    }

    #[test]
    fn force_stream_length_must_match() {
        let pts = from_speeds(&[1.0; 4]);
        let forces = vec![vec![0.0; 3]; 2];
        assert_matches!(
            detect_anomalies(&pts, Some(&forces)),
            Err(CoreError::LengthMismatch { expected: 5, actual: 2, .. })
        );
    }

    #[test]
    fn force_stream_width_must_match() {
        let pts = from_speeds(&[1.0; 2]);
        let forces = vec![vec![0.0; 3], vec![0.0; 6], vec![0.0; 3]];
        assert_matches!(
            detect_anomalies(&pts, Some(&forces)),
            Err(CoreError::DimensionMismatch { field: "force", index: 1, .. })
        );
    }

    #[test]
    fn mid_episode_stop_detected() {
        let mut speeds = vec![1.0; 5];
        speeds.extend([0.0, 0.0, 0.0]);
        speeds.extend([1.0; 5]);
        let found = detect_anomalies(&from_speeds(&speeds), None).unwrap();
        let stops: Vec<_> = found
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::UnexpectedStop)
            .collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].frame_range, (5, 8));
        assert_eq!(stops[0].timestamp_range, (5.0, 8.0));
        assert_eq!(stops[0].severity, Severity::Low);
    }

    #[test]
    fn short_stop_not_reported() {
        let detector = AnomalyDetector::new(AnomalyConfig {
            stop_min_duration_secs: 5.0,
            ..AnomalyConfig::default()
        });
        let mut speeds = vec![1.0; 5];
        speeds.extend([0.0, 0.0]);
        speeds.extend([1.0; 5]);
        let found = detector.detect(&from_speeds(&speeds), None).unwrap();
        assert!(found.iter().all(|a| a.anomaly_type != AnomalyType::UnexpectedStop));
    }

    #[test]
    fn idle_at_episode_edges_not_reported() {
        let mut speeds = vec![0.0; 4];
        speeds.extend([1.0; 10]);
        speeds.extend([0.0; 4]);
        let found = detect_anomalies(&from_speeds(&speeds), None).unwrap();
        assert!(found.iter().all(|a| a.anomaly_type != AnomalyType::UnexpectedStop));
    }

    #[test]
    fn detection_is_repeatable() {
        let mut speeds = vec![1.0; 5];
        speeds.extend([0.0, 0.0, 0.0]);
        speeds.extend([1.0, 1.0, 30.0, 1.0, 1.0, 1.0]);
        let pts = from_speeds(&speeds);
        let mut forces = vec![vec![1.0, 0.0, 0.0]; pts.len()];
        forces[3] = vec![40.0, 30.0, 0.0];

        let first = detect_anomalies(&pts, Some(&forces)).unwrap();
        assert_eq!(first, detect_anomalies(&pts, Some(&forces)).unwrap());

        let ids: Vec<&str> = first.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["velocity-spike-10-10", "force-spike-3-3", "unexpected-stop-5-8"]);
    }

    // -- manual anomalies -----------------------------------------------------

    #[test]
    fn manual_anomaly_is_not_auto_detected() {
        let mut a = Anomaly::manual(
            AnomalyType::Collision,
            Severity::High,
            (10, 12),
            (1.0, 1.2),
            "gripper hit the table",
        )
        .unwrap();
        assert!(!a.auto_detected);
        assert!(!a.verified);
        a.verify();
        assert!(a.verified);
    }

    #[test]
    fn manual_anomaly_rejects_inverted_range() {
        assert!(Anomaly::manual(AnomalyType::Other, Severity::Low, (5, 4), (0.0, 1.0), "x").is_err());
        assert!(Anomaly::manual(AnomalyType::Other, Severity::Low, (4, 5), (1.0, 0.0), "x").is_err());
    }

    #[test]
    fn anomaly_serializes_type_tag() {
        let a = Anomaly::manual(AnomalyType::DroppedObject, Severity::Medium, (0, 0), (0.0, 0.0), "")
            .unwrap();
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "dropped-object");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["frame_range"], serde_json::json!([0, 0]));
    }
}
