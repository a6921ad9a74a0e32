//! Non-destructive edit overlay for one episode.
//!
//! An [`EditModel`] never touches source data. Every field defaults to
//! "no edit" and fields never imply each other: removing a frame does not
//! drop an adjustment recorded for it. Precedence is reconciled at export
//! time by [`crate::plan`].
//!
//! Transform order within one frame is fixed: crop, then resize, then color
//! adjustment, then filter.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;
use crate::types::{EpisodeIndex, FrameIndex};

// ---------------------------------------------------------------------------
// Image transforms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeTarget {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorAdjustment {
    /// Added to every channel, `-255..=255`.
    #[serde(default)]
    pub brightness: i32,
    /// Percent contrast change, `-100.0..=100.0`.
    #[serde(default)]
    pub contrast: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    Grayscale,
    Invert,
}

/// A per-frame image transform. Absent steps are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTransform {
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub resize: Option<ResizeTarget>,
    #[serde(default)]
    pub color: Option<ColorAdjustment>,
    #[serde(default)]
    pub filter: Option<ColorFilter>,
}

impl ImageTransform {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && self.resize.is_none() && self.color.is_none() && self.filter.is_none()
    }
}

/// Validate a transform's parameters independent of any image size.
pub fn validate_transform(transform: &ImageTransform) -> Result<(), CoreError> {
    if let Some(crop) = transform.crop {
        if crop.width == 0 || crop.height == 0 {
            return Err(CoreError::Validation(
                "crop width and height must be positive".to_string(),
            ));
        }
    }
    if let Some(resize) = transform.resize {
        if resize.width == 0 || resize.height == 0 {
            return Err(CoreError::Validation(
                "resize width and height must be positive".to_string(),
            ));
        }
    }
    if let Some(color) = transform.color {
        if !(-255..=255).contains(&color.brightness) {
            return Err(CoreError::Validation(format!(
                "brightness must be between -255 and 255, got {}",
                color.brightness
            )));
        }
        if !color.contrast.is_finite() || !(-100.0..=100.0).contains(&color.contrast) {
            return Err(CoreError::Validation(format!(
                "contrast must be between -100 and 100, got {}",
                color.contrast
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Frame and trajectory edits
// ---------------------------------------------------------------------------

/// A synthesized frame between source frames `i` and `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameInsertion {
    /// `0.0` = the frame before, `1.0` = the frame after.
    pub interpolation_factor: f64,
}

/// Deltas applied to a frame's trajectory point at export time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryAdjustment {
    /// Added element-wise to `joint_positions`.
    #[serde(default)]
    pub joint_position_deltas: Option<Vec<f64>>,
    /// Replaces `gripper_state`.
    #[serde(default)]
    pub gripper_override: Option<f64>,
}

impl TrajectoryAdjustment {
    pub fn is_empty(&self) -> bool {
        self.joint_position_deltas.is_none() && self.gripper_override.is_none()
    }
}

fn validate_factor(factor: f64) -> Result<(), CoreError> {
    if factor.is_finite() && (0.0..=1.0).contains(&factor) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "interpolation_factor must be within [0, 1], got {factor}"
        )))
    }
}

fn validate_gripper(value: f64) -> Result<(), CoreError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "gripper_override must be within [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// EditModel
// ---------------------------------------------------------------------------

/// The edit overlay for one (dataset, episode) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditModel {
    pub dataset: String,
    pub episode_index: EpisodeIndex,
    #[serde(default)]
    global_transform: Option<ImageTransform>,
    #[serde(default)]
    camera_transforms: BTreeMap<String, ImageTransform>,
    #[serde(default, serialize_with = "sorted_set", deserialize_with = "set_from_list")]
    removed_frames: HashSet<FrameIndex>,
    /// Insert-after index → insertions in recorded order.
    #[serde(default)]
    inserted_frames: BTreeMap<FrameIndex, Vec<FrameInsertion>>,
    #[serde(default)]
    trajectory_adjustments: BTreeMap<FrameIndex, TrajectoryAdjustment>,
}

fn sorted_set<S: Serializer>(set: &HashSet<FrameIndex>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut frames: Vec<FrameIndex> = set.iter().copied().collect();
    frames.sort_unstable();
    frames.serialize(serializer)
}

fn set_from_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashSet<FrameIndex>, D::Error> {
    Ok(Vec::<FrameIndex>::deserialize(deserializer)?.into_iter().collect())
}

impl EditModel {
    pub fn new(dataset: impl Into<String>, episode_index: EpisodeIndex) -> Self {
        Self {
            dataset: dataset.into(),
            episode_index,
            global_transform: None,
            camera_transforms: BTreeMap::new(),
            removed_frames: HashSet::new(),
            inserted_frames: BTreeMap::new(),
            trajectory_adjustments: BTreeMap::new(),
        }
    }

    /// `true` when applying this model changes nothing.
    pub fn is_empty(&self) -> bool {
        self.global_transform.map_or(true, |t| t.is_identity())
            && self.camera_transforms.values().all(ImageTransform::is_identity)
            && self.removed_frames.is_empty()
            && self.inserted_frames.values().all(Vec::is_empty)
            && self.trajectory_adjustments.values().all(TrajectoryAdjustment::is_empty)
    }

    // -- transforms -----------------------------------------------------------

    pub fn global_transform(&self) -> Option<&ImageTransform> {
        self.global_transform.as_ref()
    }

    pub fn set_global_transform(&mut self, transform: ImageTransform) -> Result<(), CoreError> {
        validate_transform(&transform)?;
        self.global_transform = Some(transform);
        Ok(())
    }

    pub fn clear_global_transform(&mut self) {
        self.global_transform = None;
    }

    pub fn camera_transforms(&self) -> &BTreeMap<String, ImageTransform> {
        &self.camera_transforms
    }

    pub fn set_camera_transform(
        &mut self,
        camera: impl Into<String>,
        transform: ImageTransform,
    ) -> Result<(), CoreError> {
        validate_transform(&transform)?;
        self.camera_transforms.insert(camera.into(), transform);
        Ok(())
    }

    pub fn clear_camera_transform(&mut self, camera: &str) -> Option<ImageTransform> {
        self.camera_transforms.remove(camera)
    }

    /// The transform for `camera`: its own override if present, otherwise
    /// the global transform. Overrides replace, they do not merge.
    pub fn effective_transform(&self, camera: &str) -> Option<&ImageTransform> {
        self.camera_transforms
            .get(camera)
            .or(self.global_transform.as_ref())
    }

    // -- removed frames -------------------------------------------------------

    pub fn remove_frame(&mut self, frame: FrameIndex) {
        self.removed_frames.insert(frame);
    }

    pub fn restore_frame(&mut self, frame: FrameIndex) -> bool {
        self.removed_frames.remove(&frame)
    }

    pub fn is_removed(&self, frame: FrameIndex) -> bool {
        self.removed_frames.contains(&frame)
    }

    pub fn removed_frames(&self) -> &HashSet<FrameIndex> {
        &self.removed_frames
    }

    pub fn clear_removed_frames(&mut self) {
        self.removed_frames.clear();
    }

    // -- inserted frames ------------------------------------------------------

    /// Record a synthesized frame after source frame `after`.
    pub fn insert_frame(&mut self, after: FrameIndex, interpolation_factor: f64) -> Result<(), CoreError> {
        validate_factor(interpolation_factor)?;
        self.inserted_frames
            .entry(after)
            .or_default()
            .push(FrameInsertion { interpolation_factor });
        Ok(())
    }

    /// Drop every insertion recorded after `after`.
    pub fn clear_insertions_at(&mut self, after: FrameIndex) -> Vec<FrameInsertion> {
        self.inserted_frames.remove(&after).unwrap_or_default()
    }

    /// Insertions in application order: ascending key, then recorded order.
    pub fn insertions(&self) -> impl Iterator<Item = (FrameIndex, &FrameInsertion)> {
        self.inserted_frames
            .iter()
            .flat_map(|(&after, list)| list.iter().map(move |ins| (after, ins)))
    }

    pub fn insertions_after(&self, after: FrameIndex) -> &[FrameInsertion] {
        self.inserted_frames
            .get(&after)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear_inserted_frames(&mut self) {
        self.inserted_frames.clear();
    }

    // -- trajectory adjustments -----------------------------------------------

    pub fn set_adjustment(
        &mut self,
        frame: FrameIndex,
        adjustment: TrajectoryAdjustment,
    ) -> Result<(), CoreError> {
        if let Some(g) = adjustment.gripper_override {
            validate_gripper(g)?;
        }
        if let Some(deltas) = &adjustment.joint_position_deltas {
            if deltas.iter().any(|d| !d.is_finite()) {
                return Err(CoreError::Validation(
                    "joint_position_deltas must be finite".to_string(),
                ));
            }
        }
        self.trajectory_adjustments.insert(frame, adjustment);
        Ok(())
    }

    pub fn clear_adjustment(&mut self, frame: FrameIndex) -> Option<TrajectoryAdjustment> {
        self.trajectory_adjustments.remove(&frame)
    }

    pub fn adjustment(&self, frame: FrameIndex) -> Option<&TrajectoryAdjustment> {
        self.trajectory_adjustments.get(&frame)
    }

    pub fn adjustments(&self) -> &BTreeMap<FrameIndex, TrajectoryAdjustment> {
        &self.trajectory_adjustments
    }

    pub fn clear_adjustments(&mut self) {
        self.trajectory_adjustments.clear();
    }

    /// Reset every field to "no edit".
    pub fn clear(&mut self) {
        self.global_transform = None;
        self.camera_transforms.clear();
        self.removed_frames.clear();
        self.inserted_frames.clear();
        self.trajectory_adjustments.clear();
    }

    // -- validation -----------------------------------------------------------

    /// Check the overlay against the source episode it will be applied to.
    ///
    /// Frame indices must exist, insertions need a following source frame to
    /// blend with, and position deltas must match the joint count. Edits on
    /// removed frames are not errors; they are simply never applied.
    pub fn validate_against(&self, frame_count: usize, joint_dims: usize) -> Result<(), CoreError> {
        if let Some(&frame) = self.removed_frames.iter().find(|&&f| f >= frame_count) {
            return Err(CoreError::Validation(format!(
                "removed frame {frame} is outside the episode (0..{frame_count})"
            )));
        }

        for (&after, list) in &self.inserted_frames {
            if !list.is_empty() && after + 1 >= frame_count {
                return Err(CoreError::Validation(format!(
                    "cannot insert after frame {after}: no following frame in a {frame_count}-frame episode"
                )));
            }
            for ins in list {
                validate_factor(ins.interpolation_factor)?;
            }
        }

        for (&frame, adj) in &self.trajectory_adjustments {
            if frame >= frame_count {
                return Err(CoreError::Validation(format!(
                    "trajectory adjustment at frame {frame} is outside the episode (0..{frame_count})"
                )));
            }
            if let Some(deltas) = &adj.joint_position_deltas {
                if deltas.len() != joint_dims {
                    return Err(CoreError::DimensionMismatch {
                        field: "joint_position_deltas",
                        index: frame,
                        expected: joint_dims,
                        actual: deltas.len(),
                    });
                }
            }
            if let Some(g) = adj.gripper_override {
                validate_gripper(g)?;
            }
        }

        if let Some(t) = &self.global_transform {
            validate_transform(t)?;
        }
        for t in self.camera_transforms.values() {
            validate_transform(t)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
