//! Output frame planning.
//!
//! The plan is the final ordered list of output frames, computed once before
//! any I/O: source frames minus removals, with synthesized frames spliced in
//! after their insertion keys. Later export stages only walk the plan.

use serde::{Deserialize, Serialize};

use crate::edit::EditModel;
use crate::error::CoreError;
use crate::trajectory::TrajectoryPoint;
use crate::types::FrameIndex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where one output frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedFrame {
    Source {
        frame: FrameIndex,
    },
    /// Blend of source frames `before` and `before + 1`.
    Synthesized {
        before: FrameIndex,
        after: FrameIndex,
        factor: f64,
    },
}

impl PlannedFrame {
    pub fn is_synthesized(&self) -> bool {
        matches!(self, Self::Synthesized { .. })
    }
}

/// How gripper state is derived for synthesized frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperPolicy {
    /// Copy the gripper state of the closer frame; factor 0.5 goes to `after`.
    #[default]
    Nearest,
    /// Interpolate linearly like the joint values.
    Linear,
}

impl std::str::FromStr for GripperPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            other => Err(CoreError::Validation(format!(
                "unknown gripper policy '{other}', expected 'nearest' or 'linear'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Build the output frame list for an episode of `frame_count` frames.
///
/// With no edits, or `apply_edits == false`, the plan is every source frame
/// in order. Insertions whose key has no following source frame are skipped;
/// [`EditModel::validate_against`] reports them before export.
pub fn build_frame_plan(
    frame_count: usize,
    edits: Option<&EditModel>,
    apply_edits: bool,
) -> Vec<PlannedFrame> {
    let edits = edits.filter(|_| apply_edits);
    let mut plan = Vec::with_capacity(frame_count);

    for frame in 0..frame_count {
        let Some(edits) = edits else {
            plan.push(PlannedFrame::Source { frame });
            continue;
        };

        if !edits.is_removed(frame) {
            plan.push(PlannedFrame::Source { frame });
        }
        if frame + 1 < frame_count {
            for ins in edits.insertions_after(frame) {
                plan.push(PlannedFrame::Synthesized {
                    before: frame,
                    after: frame + 1,
                    factor: ins.interpolation_factor,
                });
            }
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Trajectory materialization
// ---------------------------------------------------------------------------

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_vec(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| lerp(*x, *y, t)).collect()
}

fn source_point(points: &[TrajectoryPoint], frame: FrameIndex) -> Result<&TrajectoryPoint, CoreError> {
    points.get(frame).ok_or_else(|| {
        CoreError::Internal(format!(
            "planned frame {frame} is outside a {}-point trajectory",
            points.len()
        ))
    })
}

/// Produce the trajectory point written at output position `output_index`.
///
/// Source frames get their adjustment applied; synthesized frames are
/// interpolated and never adjusted. Removed frames never reach this point, so
/// adjustments recorded on them are dropped.
pub fn materialize_point(
    points: &[TrajectoryPoint],
    planned: &PlannedFrame,
    output_index: usize,
    edits: Option<&EditModel>,
    gripper: GripperPolicy,
) -> Result<TrajectoryPoint, CoreError> {
    let mut point = match *planned {
        PlannedFrame::Source { frame } => {
            let mut p = source_point(points, frame)?.clone();
            if let Some(adj) = edits.and_then(|e| e.adjustment(frame)) {
                if let Some(deltas) = &adj.joint_position_deltas {
                    if deltas.len() != p.joint_positions.len() {
                        return Err(CoreError::DimensionMismatch {
                            field: "joint_position_deltas",
                            index: frame,
                            expected: p.joint_positions.len(),
                            actual: deltas.len(),
                        });
                    }
                    for (q, d) in p.joint_positions.iter_mut().zip(deltas) {
                        *q += d;
                    }
                }
                if let Some(g) = adj.gripper_override {
                    p.gripper_state = g;
                }
            }
            p
        }
        PlannedFrame::Synthesized { before, after, factor } => {
            let a = source_point(points, before)?;
            let b = source_point(points, after)?;
            let gripper_state = match gripper {
                GripperPolicy::Nearest if factor < 0.5 => a.gripper_state,
                GripperPolicy::Nearest => b.gripper_state,
                GripperPolicy::Linear => lerp(a.gripper_state, b.gripper_state, factor),
            };
            TrajectoryPoint {
                timestamp: lerp(a.timestamp, b.timestamp, factor),
                frame: before,
                joint_positions: lerp_vec(&a.joint_positions, &b.joint_positions, factor),
                joint_velocities: lerp_vec(&a.joint_velocities, &b.joint_velocities, factor),
                end_effector_pose: lerp_vec(&a.end_effector_pose, &b.end_effector_pose, factor),
                gripper_state,
            }
        }
    };
    point.frame = output_index;
    Ok(point)
}

/// Materialize the whole output trajectory for `plan`.
pub fn materialize_trajectory(
    points: &[TrajectoryPoint],
    plan: &[PlannedFrame],
    edits: Option<&EditModel>,
    gripper: GripperPolicy,
) -> Result<Vec<TrajectoryPoint>, CoreError> {
    plan.iter()
        .enumerate()
        .map(|(i, planned)| materialize_point(points, planned, i, edits, gripper))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::TrajectoryAdjustment;
    use crate::trajectory::tests::point;
    use assert_matches::assert_matches;

    fn sources(plan: &[PlannedFrame]) -> Vec<usize> {
        plan.iter()
            .filter_map(|p| match p {
                PlannedFrame::Source { frame } => Some(*frame),
                PlannedFrame::Synthesized { .. } => None,
            })
            .collect()
    }

    fn two_points(g0: f64, g1: f64) -> Vec<TrajectoryPoint> {
        let mut a = point(0.0, 0, &[0.0, 0.0]);
        let mut b = point(1.0, 1, &[2.0, 4.0]);
        a.gripper_state = g0;
        b.gripper_state = g1;
        vec![a, b]
    }

    #[test]
    fn no_edits_is_identity() {
        let plan = build_frame_plan(4, None, true);
        assert_eq!(sources(&plan), vec![0, 1, 2, 3]);
    }

    #[test]
    fn removed_frames_keep_relative_order() {
        let mut edits = EditModel::new("ds", 0);
        for f in [2, 3, 4] {
            edits.remove_frame(f);
        }
        let plan = build_frame_plan(10, Some(&edits), true);
        assert_eq!(plan.len(), 7);
        assert_eq!(sources(&plan), vec![0, 1, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn apply_edits_false_ignores_model() {
        let mut edits = EditModel::new("ds", 0);
        edits.remove_frame(1);
        edits.insert_frame(0, 0.5).unwrap();
        let plan = build_frame_plan(3, Some(&edits), false);
        assert_eq!(sources(&plan), vec![0, 1, 2]);
        assert!(plan.iter().all(|p| !p.is_synthesized()));
    }

    #[test]
    fn insertions_spliced_after_key_in_recorded_order() {
        let mut edits = EditModel::new("ds", 0);
        edits.insert_frame(1, 0.75).unwrap();
        edits.insert_frame(0, 0.5).unwrap();
        edits.insert_frame(1, 0.25).unwrap();

        let plan = build_frame_plan(3, Some(&edits), true);
        assert_eq!(
            plan,
            vec![
                PlannedFrame::Source { frame: 0 },
                PlannedFrame::Synthesized { before: 0, after: 1, factor: 0.5 },
                PlannedFrame::Source { frame: 1 },
                PlannedFrame::Synthesized { before: 1, after: 2, factor: 0.75 },
                PlannedFrame::Synthesized { before: 1, after: 2, factor: 0.25 },
                PlannedFrame::Source { frame: 2 },
            ]
        );
    }

    #[test]
    fn insertion_survives_removal_of_its_key() {
        let mut edits = EditModel::new("ds", 0);
        edits.remove_frame(1);
        edits.insert_frame(1, 0.5).unwrap();
        let plan = build_frame_plan(3, Some(&edits), true);
        assert_eq!(plan.len(), 3);
        assert_matches!(plan[1], PlannedFrame::Synthesized { before: 1, after: 2, .. });
    }

    #[test]
    fn trailing_insertion_skipped() {
        let mut edits = EditModel::new("ds", 0);
        edits.insert_frame(2, 0.5).unwrap();
        let plan = build_frame_plan(3, Some(&edits), true);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn synthesized_point_interpolates_joints_and_time() {
        let pts = two_points(0.0, 1.0);
        let planned = PlannedFrame::Synthesized { before: 0, after: 1, factor: 0.25 };
        let p = materialize_point(&pts, &planned, 1, None, GripperPolicy::Linear).unwrap();
        assert_eq!(p.frame, 1);
        assert!((p.timestamp - 0.25).abs() < 1e-12);
        assert_eq!(p.joint_positions, vec![0.5, 1.0]);
        assert!((p.gripper_state - 0.25).abs() < 1e-12);
    }

    #[test]
    fn nearest_gripper_snaps_to_closer_frame() {
        let pts = two_points(0.0, 1.0);
        let at = |factor| {
            let planned = PlannedFrame::Synthesized { before: 0, after: 1, factor };
            materialize_point(&pts, &planned, 1, None, GripperPolicy::Nearest)
                .unwrap()
                .gripper_state
        };
        assert_eq!(at(0.2), 0.0);
        assert_eq!(at(0.49), 0.0);
        assert_eq!(at(0.5), 1.0);
        assert_eq!(at(0.9), 1.0);
    }

    #[test]
    fn adjustment_applied_to_source_frame() {
        let pts = two_points(0.3, 0.3);
        let mut edits = EditModel::new("ds", 0);
        edits
            .set_adjustment(
                1,
                TrajectoryAdjustment {
                    joint_position_deltas: Some(vec![0.5, -1.0]),
                    gripper_override: Some(1.0),
                },
            )
            .unwrap();
        let plan = build_frame_plan(2, Some(&edits), true);
        let out = materialize_trajectory(&pts, &plan, Some(&edits), GripperPolicy::Nearest).unwrap();
        assert_eq!(out[1].joint_positions, vec![2.5, 3.0]);
        assert_eq!(out[1].gripper_state, 1.0);
        assert_eq!(out[0], pts[0]);
    }

    #[test]
    fn adjustment_on_removed_frame_dropped() {
        let pts = two_points(0.3, 0.3);
        let mut edits = EditModel::new("ds", 0);
        edits
            .set_adjustment(0, TrajectoryAdjustment { gripper_override: Some(1.0), ..Default::default() })
            .unwrap();
        edits.remove_frame(0);
        let plan = build_frame_plan(2, Some(&edits), true);
        let out = materialize_trajectory(&pts, &plan, Some(&edits), GripperPolicy::Nearest).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gripper_state, 0.3);
        assert_eq!(out[0].frame, 0);
        assert_eq!(out[0].joint_positions, pts[1].joint_positions);
    }

    #[test]
    fn output_frames_reindexed() {
        let pts: Vec<TrajectoryPoint> =
            (0..5).map(|i| point(i as f64 * 0.1, i, &[i as f64])).collect();
        let mut edits = EditModel::new("ds", 0);
        edits.remove_frame(1);
        edits.insert_frame(2, 0.5).unwrap();
        let plan = build_frame_plan(5, Some(&edits), true);
        let out = materialize_trajectory(&pts, &plan, Some(&edits), GripperPolicy::Nearest).unwrap();
        let frames: Vec<usize> = out.iter().map(|p| p.frame).collect();
        assert_eq!(frames, vec![0, 1, 2, 3, 4]);
        assert_eq!(out[2].joint_positions, vec![2.5]);
    }

    #[test]
    fn mismatched_deltas_are_integrity_error() {
        let pts = two_points(0.0, 0.0);
        let mut edits = EditModel::new("ds", 0);
        edits
            .set_adjustment(0, TrajectoryAdjustment { joint_position_deltas: Some(vec![1.0]), ..Default::default() })
            .unwrap();
        let planned = PlannedFrame::Source { frame: 0 };
        assert_matches!(
            materialize_point(&pts, &planned, 0, Some(&edits), GripperPolicy::Nearest),
            Err(CoreError::DimensionMismatch { .. })
        );
    }

    #[test]
    fn gripper_policy_parses() {
        assert_eq!("Linear".parse::<GripperPolicy>().unwrap(), GripperPolicy::Linear);
        assert_eq!(" nearest ".parse::<GripperPolicy>().unwrap(), GripperPolicy::Nearest);
        assert!("snap".parse::<GripperPolicy>().is_err());
    }
}
