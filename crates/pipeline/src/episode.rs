//! Export of a single episode through the stage machine.
//!
//! Frames are processed strictly in plan order. Cancellation is checked at
//! every stage boundary and between frames, never mid-frame. Anything
//! staged in the sink is aborted unless the whole episode commits.

use std::path::PathBuf;

use image::DynamicImage;
use roboqa_core::edit::{EditModel, ImageTransform};
use roboqa_core::export::{EpisodeMetadata, ExportStage};
use roboqa_core::frame::{apply_transform, blend_frames};
use roboqa_core::plan::{build_frame_plan, materialize_trajectory, PlannedFrame};
use roboqa_core::trajectory::{validate_dimensions, validate_length, TrajectoryPoint};
use roboqa_core::types::EpisodeIndex;
use roboqa_events::progress::ProgressReporter;
use roboqa_storage::{EpisodeSource, EpisodeWriter, ExportSink};
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::error::{ExportError, ExportFailure};

pub(crate) enum EpisodeOutcome {
    Completed {
        files: Vec<PathBuf>,
        frames_written: usize,
        size_bytes: u64,
    },
    Cancelled,
}

/// Everything needed to export one episode.
pub(crate) struct EpisodeJob<'a, S, K> {
    pub source: &'a S,
    pub sink: &'a K,
    pub dataset: &'a str,
    pub episode: EpisodeIndex,
    pub edits: Option<&'a EditModel>,
    pub config: &'a ExportConfig,
    pub cancel: &'a CancellationToken,
}

/// Source data read and validated during `reading-source`.
struct LoadedEpisode {
    points: Vec<TrajectoryPoint>,
    cameras: Vec<String>,
    joint_dims: usize,
    pose_dims: usize,
}

impl<'a, S: EpisodeSource, K: ExportSink> EpisodeJob<'a, S, K> {
    fn fail(&self, stage: ExportStage, source: impl Into<ExportFailure>) -> ExportError {
        ExportError::new(self.episode, stage, source)
    }

    /// The overlay in effect, if edits are applied at all.
    fn effective_edits(&self) -> Option<&'a EditModel> {
        self.edits.filter(|_| self.config.apply_edits)
    }

    fn transform_for(&self, camera: &str) -> Option<&'a ImageTransform> {
        self.effective_edits()
            .and_then(|e| e.effective_transform(camera))
            .filter(|t| !t.is_identity())
    }

    pub(crate) async fn run(&self, reporter: &mut ProgressReporter) -> Result<EpisodeOutcome, ExportError> {
        // -- reading-source ----------------------------------------------------
        reporter.enter(ExportStage::ReadingSource).await;
        if self.cancel.is_cancelled() {
            return Ok(EpisodeOutcome::Cancelled);
        }
        let loaded = self.load_source().await?;

        // -- applying-trajectory-edits ----------------------------------------
        let stage = ExportStage::ApplyingTrajectoryEdits;
        reporter.enter(stage).await;
        if self.cancel.is_cancelled() {
            return Ok(EpisodeOutcome::Cancelled);
        }
        let edits = self.effective_edits();
        let plan = build_frame_plan(loaded.points.len(), edits, self.config.apply_edits);
        let trajectory = materialize_trajectory(&loaded.points, &plan, edits, self.config.gripper_policy)
            .map_err(|e| self.fail(stage, e))?;
        reporter.set_total_frames(plan.len());

        tracing::debug!(
            episode_index = self.episode,
            source_frames = loaded.points.len(),
            output_frames = plan.len(),
            cameras = loaded.cameras.len(),
            "Frame plan built",
        );

        // -- applying-frame-edits / writing-output ----------------------------
        reporter.enter(ExportStage::ApplyingFrameEdits).await;
        let mut writer = self
            .sink
            .begin(self.episode)
            .await
            .map_err(|e| self.fail(ExportStage::ApplyingFrameEdits, e))?;

        let metadata = EpisodeMetadata {
            dataset: self.dataset.to_string(),
            episode_index: self.episode,
            source_frame_count: loaded.points.len(),
            frame_count: plan.len(),
            cameras: loaded.cameras.clone(),
            joint_dims: loaded.joint_dims,
            pose_dims: loaded.pose_dims,
            edits_applied: edits.is_some(),
            gripper_policy: self.config.gripper_policy,
            frame_map: plan.clone(),
        };

        match self
            .write_all(&mut writer, reporter, &loaded.cameras, &plan, &trajectory, &metadata)
            .await
        {
            Ok(Some(size_bytes)) => {
                let files = writer
                    .commit()
                    .await
                    .map_err(|e| self.fail(ExportStage::WritingOutput, e))?;
                Ok(EpisodeOutcome::Completed {
                    files,
                    frames_written: plan.len(),
                    size_bytes,
                })
            }
            Ok(None) => {
                self.discard(writer).await;
                Ok(EpisodeOutcome::Cancelled)
            }
            Err(e) => {
                self.discard(writer).await;
                Err(e)
            }
        }
    }

    async fn load_source(&self) -> Result<LoadedEpisode, ExportError> {
        let stage = ExportStage::ReadingSource;
        let points = self
            .source
            .load_trajectory(self.dataset, self.episode)
            .await
            .map_err(|e| self.fail(stage, e))?
            .ok_or_else(|| self.fail(stage, ExportFailure::MissingEpisode))?;

        let dims = validate_dimensions(&points).map_err(|e| self.fail(stage, e))?;
        let cameras = self
            .source
            .camera_names(self.dataset, self.episode)
            .await
            .map_err(|e| self.fail(stage, e))?;
        for camera in &cameras {
            let frames = self
                .source
                .frame_count(self.dataset, self.episode, camera)
                .await
                .map_err(|e| self.fail(stage, e))?;
            validate_length(&points, frames).map_err(|e| self.fail(stage, e))?;
        }

        let (joint_dims, pose_dims) = dims.map_or((0, 0), |d| (d.joints, d.pose));
        if let Some(edits) = self.effective_edits() {
            edits
                .validate_against(points.len(), joint_dims)
                .map_err(|e| self.fail(stage, e))?;
        }

        Ok(LoadedEpisode {
            points,
            cameras,
            joint_dims,
            pose_dims,
        })
    }

    /// Write every frame, then trajectory and metadata. `Ok(None)` means
    /// cancelled; the caller aborts the writer.
    async fn write_all(
        &self,
        writer: &mut K::Writer,
        reporter: &mut ProgressReporter,
        cameras: &[String],
        plan: &[PlannedFrame],
        trajectory: &[TrajectoryPoint],
        metadata: &EpisodeMetadata,
    ) -> Result<Option<u64>, ExportError> {
        let stage = ExportStage::ApplyingFrameEdits;
        let mut size_bytes = 0u64;

        for (index, planned) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            for camera in cameras {
                let image = self
                    .render_frame(camera, planned)
                    .await
                    .map_err(|e| self.fail(stage, e))?;
                size_bytes += writer
                    .write_frame(camera, index, &image)
                    .await
                    .map_err(|e| self.fail(stage, e))?;
            }
            reporter.frame_done(index + 1).await;
        }

        let stage = ExportStage::WritingOutput;
        reporter.enter(stage).await;
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        size_bytes += writer
            .write_trajectory(trajectory)
            .await
            .map_err(|e| self.fail(stage, e))?;
        size_bytes += writer
            .write_metadata(metadata)
            .await
            .map_err(|e| self.fail(stage, e))?;
        Ok(Some(size_bytes))
    }

    async fn render_frame(&self, camera: &str, planned: &PlannedFrame) -> Result<DynamicImage, ExportFailure> {
        let image = match *planned {
            PlannedFrame::Source { frame } => {
                self.source
                    .load_frame(self.dataset, self.episode, camera, frame)
                    .await?
            }
            PlannedFrame::Synthesized { before, after, factor } => {
                let a = self.source.load_frame(self.dataset, self.episode, camera, before).await?;
                let b = self.source.load_frame(self.dataset, self.episode, camera, after).await?;
                blend_frames(&a, &b, factor)?
            }
        };

        match self.transform_for(camera) {
            Some(transform) => Ok(apply_transform(&image, transform)?),
            None => Ok(image),
        }
    }

    async fn discard(&self, writer: K::Writer) {
        if let Err(e) = writer.abort().await {
            tracing::warn!(episode_index = self.episode, error = %e, "Failed to discard staged export");
        }
    }
}
