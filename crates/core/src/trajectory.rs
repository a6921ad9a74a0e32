//! Per-frame kinematic samples and trajectory integrity checks.
//!
//! A trajectory is an ordered `[TrajectoryPoint]`, index-aligned with the
//! episode's video frames `0..N-1`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::FrameIndex;

/// One kinematic sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Seconds since episode start. Expected to be strictly increasing.
    pub timestamp: f64,
    pub frame: FrameIndex,
    pub joint_positions: Vec<f64>,
    pub joint_velocities: Vec<f64>,
    pub end_effector_pose: Vec<f64>,
    /// Gripper opening in `[0, 1]`.
    pub gripper_state: f64,
}

/// Shared vector widths of a validated trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectoryDims {
    pub joints: usize,
    pub pose: usize,
}

/// Check that every point shares the first point's vector dimensionality
/// and carries only finite values.
///
/// Returns the common dimensions, or `None` for an empty trajectory.
/// Either failure is a data-integrity error reported with the index of the
/// first offending sample.
pub fn validate_dimensions(points: &[TrajectoryPoint]) -> Result<Option<TrajectoryDims>, CoreError> {
    let Some(first) = points.first() else {
        return Ok(None);
    };

    let joints = first.joint_positions.len();
    let pose = first.end_effector_pose.len();

    for (index, p) in points.iter().enumerate() {
        check_len("joint_positions", index, joints, p.joint_positions.len())?;
        check_len("joint_velocities", index, joints, p.joint_velocities.len())?;
        check_len("end_effector_pose", index, pose, p.end_effector_pose.len())?;
        check_finite(p, index)?;
    }

    Ok(Some(TrajectoryDims { joints, pose }))
}

fn check_len(
    field: &'static str,
    index: usize,
    expected: usize,
    actual: usize,
) -> Result<(), CoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::DimensionMismatch {
            field,
            index,
            expected,
            actual,
        })
    }
}

fn check_finite(p: &TrajectoryPoint, index: usize) -> Result<(), CoreError> {
    let fields: [(&'static str, &[f64]); 5] = [
        ("timestamp", std::slice::from_ref(&p.timestamp)),
        ("joint_positions", p.joint_positions.as_slice()),
        ("joint_velocities", p.joint_velocities.as_slice()),
        ("end_effector_pose", p.end_effector_pose.as_slice()),
        ("gripper_state", std::slice::from_ref(&p.gripper_state)),
    ];
    match fields.iter().find(|(_, values)| values.iter().any(|v| !v.is_finite())) {
        Some(&(field, _)) => Err(CoreError::NonFinite { field, index }),
        None => Ok(()),
    }
}

/// Check that a trajectory covers exactly `frame_count` frames.
pub fn validate_length(points: &[TrajectoryPoint], frame_count: usize) -> Result<(), CoreError> {
    if points.len() == frame_count {
        Ok(())
    } else {
        Err(CoreError::LengthMismatch {
            what: "trajectory".to_string(),
            expected: frame_count,
            actual: points.len(),
        })
    }
}

/// Joint-space position of every sample, borrowed.
pub fn positions(points: &[TrajectoryPoint]) -> Vec<&[f64]> {
    points.iter().map(|p| p.joint_positions.as_slice()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
