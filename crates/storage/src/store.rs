//! Storage contracts consumed by the analysis and export layers.
//!
//! Absence is a normal state: missing annotation files, edits or source
//! trajectories come back as `Ok(None)`, never as errors.

use std::future::Future;
use std::path::PathBuf;

use image::DynamicImage;
use roboqa_core::annotation::EpisodeAnnotationFile;
use roboqa_core::edit::EditModel;
use roboqa_core::export::EpisodeMetadata;
use roboqa_core::trajectory::TrajectoryPoint;
use roboqa_core::types::{EpisodeIndex, FrameIndex};

use crate::error::StorageError;

/// Persisted annotation files, one per (dataset, episode).
pub trait AnnotationStore: Send + Sync {
    fn get_annotation(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<Option<EpisodeAnnotationFile>, StorageError>> + Send;

    /// Replace the stored file for `file.dataset()` / `file.episode_index()`.
    fn save_annotation(
        &self,
        file: &EpisodeAnnotationFile,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Episode indices with an annotation file, ascending.
    fn list_annotated_episodes(
        &self,
        dataset: &str,
    ) -> impl Future<Output = Result<Vec<EpisodeIndex>, StorageError>> + Send;

    /// Remove the whole file. Returns `false` if there was none.
    fn delete_annotation(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

/// Persisted edit overlays, one per (dataset, episode).
pub trait EditStore: Send + Sync {
    fn get_edits(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<Option<EditModel>, StorageError>> + Send;

    fn save_edits(&self, edits: &EditModel) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete_edits(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

/// Read access to immutable source episodes.
pub trait EpisodeSource: Send + Sync {
    /// Episode indices that have a trajectory, ascending.
    fn list_episodes(&self, dataset: &str) -> impl Future<Output = Result<Vec<EpisodeIndex>, StorageError>> + Send;

    fn load_trajectory(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<Option<Vec<TrajectoryPoint>>, StorageError>> + Send;

    /// Per-sample force vectors, if the episode recorded them.
    fn load_forces(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<Option<Vec<Vec<f64>>>, StorageError>> + Send;

    /// Camera names, sorted.
    fn camera_names(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    fn frame_count(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        camera: &str,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    fn load_frame(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        camera: &str,
        frame: FrameIndex,
    ) -> impl Future<Output = Result<DynamicImage, StorageError>> + Send;
}

/// Destination for exported episodes.
///
/// Each episode is written through its own [`EpisodeWriter`]. Nothing becomes
/// visible at the final location until [`EpisodeWriter::commit`] succeeds.
pub trait ExportSink: Send + Sync {
    type Writer: EpisodeWriter;

    fn begin(&self, episode: EpisodeIndex) -> impl Future<Output = Result<Self::Writer, StorageError>> + Send;
}

pub trait EpisodeWriter: Send {
    /// Returns the number of bytes written.
    fn write_frame(
        &mut self,
        camera: &str,
        frame: FrameIndex,
        image: &DynamicImage,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn write_trajectory(
        &mut self,
        points: &[TrajectoryPoint],
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn write_metadata(
        &mut self,
        metadata: &EpisodeMetadata,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Publish the episode atomically and return its final file paths.
    fn commit(self) -> impl Future<Output = Result<Vec<PathBuf>, StorageError>> + Send;

    /// Discard everything written so far.
    fn abort(self) -> impl Future<Output = Result<(), StorageError>> + Send;
}
