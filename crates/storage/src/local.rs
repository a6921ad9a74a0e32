//! Filesystem backend.
//!
//! JSON documents are written to a `.tmp` sibling and renamed into place.
//! Exported episodes are staged in a hidden `.episode_NNNNNN.partial`
//! directory and renamed to their final name on commit. See
//! [`crate::layout`] for the directory structure.

use std::collections::HashSet;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use roboqa_core::annotation::EpisodeAnnotationFile;
use roboqa_core::edit::EditModel;
use roboqa_core::export::EpisodeMetadata;
use roboqa_core::trajectory::TrajectoryPoint;
use roboqa_core::types::{EpisodeIndex, FrameIndex};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};
use crate::layout;
use crate::store::{AnnotationStore, EditStore, EpisodeSource, EpisodeWriter, ExportSink};

// ---------------------------------------------------------------------------
// JSON / directory helpers
// ---------------------------------------------------------------------------

async fn read_json<T: DeserializeOwned + Send>(path: &Path) -> StorageResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::json(path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

async fn write_json_atomic<T: Serialize + Sync + ?Sized>(path: &Path, value: &T) -> StorageResult<u64> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::json(path, e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    Ok(bytes.len() as u64)
}

async fn remove_file_if_exists(path: &Path) -> StorageResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

async fn remove_dir_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Entry names in `dir`, filtered to directories or files. A missing
/// directory yields no entries.
async fn list_dir(dir: &Path, want_dirs: bool) -> StorageResult<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(dir, e))? {
        let file_type = entry.file_type().await.map_err(|e| StorageError::io(entry.path(), e))?;
        if file_type.is_dir() == want_dirs {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// Source episodes, annotations and edits under one data root.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn episode_dir(&self, dataset: &str, episode: EpisodeIndex) -> PathBuf {
        layout::source_episode_dir(&self.root, dataset, episode)
    }

    fn camera_dir(&self, dataset: &str, episode: EpisodeIndex, camera: &str) -> PathBuf {
        self.episode_dir(dataset, episode).join(layout::CAMERAS_DIR).join(camera)
    }
}

impl AnnotationStore for LocalStore {
    async fn get_annotation(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EpisodeAnnotationFile>> {
        read_json(&layout::annotation_path(&self.root, dataset, episode)).await
    }

    async fn save_annotation(&self, file: &EpisodeAnnotationFile) -> StorageResult<()> {
        let path = layout::annotation_path(&self.root, file.dataset(), file.episode_index());
        let bytes = write_json_atomic(&path, file).await?;
        tracing::debug!(path = %path.display(), bytes, annotators = file.len(), "Annotation file saved");
        Ok(())
    }

    async fn list_annotated_episodes(&self, dataset: &str) -> StorageResult<Vec<EpisodeIndex>> {
        let dir = self.root.join(dataset).join(layout::ANNOTATIONS_DIR);
        let mut episodes: Vec<EpisodeIndex> = list_dir(&dir, false)
            .await?
            .iter()
            .filter(|name| name.ends_with(".json"))
            .filter_map(|name| layout::parse_episode_name(name))
            .collect();
        episodes.sort_unstable();
        Ok(episodes)
    }

    async fn delete_annotation(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<bool> {
        remove_file_if_exists(&layout::annotation_path(&self.root, dataset, episode)).await
    }
}

impl EditStore for LocalStore {
    async fn get_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EditModel>> {
        read_json(&layout::edits_path(&self.root, dataset, episode)).await
    }

    async fn save_edits(&self, edits: &EditModel) -> StorageResult<()> {
        let path = layout::edits_path(&self.root, &edits.dataset, edits.episode_index);
        write_json_atomic(&path, edits).await?;
        tracing::debug!(path = %path.display(), "Edit overlay saved");
        Ok(())
    }

    async fn delete_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<bool> {
        remove_file_if_exists(&layout::edits_path(&self.root, dataset, episode)).await
    }
}

impl EpisodeSource for LocalStore {
    async fn list_episodes(&self, dataset: &str) -> StorageResult<Vec<EpisodeIndex>> {
        let dir = self.root.join(dataset).join(layout::EPISODES_DIR);
        let mut episodes = Vec::new();
        for name in list_dir(&dir, true).await? {
            let Some(index) = layout::parse_episode_name(&name) else {
                continue;
            };
            let has_trajectory = tokio::fs::try_exists(dir.join(&name).join(layout::TRAJECTORY_FILE))
                .await
                .map_err(|e| StorageError::io(dir.join(&name), e))?;
            if has_trajectory {
                episodes.push(index);
            }
        }
        episodes.sort_unstable();
        Ok(episodes)
    }

    async fn load_trajectory(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<Vec<TrajectoryPoint>>> {
        read_json(&self.episode_dir(dataset, episode).join(layout::TRAJECTORY_FILE)).await
    }

    async fn load_forces(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<Vec<Vec<f64>>>> {
        read_json(&self.episode_dir(dataset, episode).join(layout::FORCES_FILE)).await
    }

    async fn camera_names(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Vec<String>> {
        list_dir(&self.episode_dir(dataset, episode).join(layout::CAMERAS_DIR), true).await
    }

    async fn frame_count(&self, dataset: &str, episode: EpisodeIndex, camera: &str) -> StorageResult<usize> {
        let names = list_dir(&self.camera_dir(dataset, episode, camera), false).await?;
        Ok(names.iter().filter(|n| layout::parse_frame_name(n).is_some()).count())
    }

    async fn load_frame(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        camera: &str,
        frame: FrameIndex,
    ) -> StorageResult<DynamicImage> {
        let path = self
            .camera_dir(dataset, episode, camera)
            .join(layout::frame_file_name(frame));
        let bytes = tokio::fs::read(&path).await.map_err(|e| StorageError::io(&path, e))?;
        image::load_from_memory(&bytes).map_err(|e| StorageError::image(&path, e))
    }
}

// ---------------------------------------------------------------------------
// LocalSink
// ---------------------------------------------------------------------------

/// Writes exported episodes under one output directory.
#[derive(Debug, Clone)]
pub struct LocalSink {
    output_dir: PathBuf,
}

impl LocalSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ExportSink for LocalSink {
    type Writer = LocalEpisodeWriter;

    async fn begin(&self, episode: EpisodeIndex) -> StorageResult<LocalEpisodeWriter> {
        let staging = self.output_dir.join(layout::staging_dir_name(episode));
        // A leftover staging dir is from an interrupted run.
        remove_dir_if_exists(&staging).await?;
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| StorageError::io(&staging, e))?;

        Ok(LocalEpisodeWriter {
            episode,
            final_dir: self.output_dir.join(layout::episode_dir_name(episode)),
            staging,
            camera_dirs: HashSet::new(),
            written: Vec::new(),
        })
    }
}

pub struct LocalEpisodeWriter {
    episode: EpisodeIndex,
    staging: PathBuf,
    final_dir: PathBuf,
    camera_dirs: HashSet<String>,
    /// Paths relative to the episode directory, in write order.
    written: Vec<PathBuf>,
}

impl LocalEpisodeWriter {
    async fn put(&mut self, relative: PathBuf, bytes: &[u8]) -> StorageResult<u64> {
        let path = self.staging.join(&relative);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        self.written.push(relative);
        Ok(bytes.len() as u64)
    }
}

impl EpisodeWriter for LocalEpisodeWriter {
    async fn write_frame(&mut self, camera: &str, frame: FrameIndex, image: &DynamicImage) -> StorageResult<u64> {
        let camera_rel = Path::new(layout::CAMERAS_DIR).join(camera);
        if !self.camera_dirs.contains(camera) {
            let dir = self.staging.join(&camera_rel);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::io(&dir, e))?;
            self.camera_dirs.insert(camera.to_string());
        }

        let relative = camera_rel.join(layout::frame_file_name(frame));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| StorageError::image(self.staging.join(&relative), e))?;
        self.put(relative, &buf).await
    }

    async fn write_trajectory(&mut self, points: &[TrajectoryPoint]) -> StorageResult<u64> {
        let path = self.staging.join(layout::TRAJECTORY_FILE);
        let bytes = serde_json::to_vec_pretty(points).map_err(|e| StorageError::json(&path, e))?;
        self.put(PathBuf::from(layout::TRAJECTORY_FILE), &bytes).await
    }

    async fn write_metadata(&mut self, metadata: &EpisodeMetadata) -> StorageResult<u64> {
        let path = self.staging.join(layout::METADATA_FILE);
        let bytes = serde_json::to_vec_pretty(metadata).map_err(|e| StorageError::json(&path, e))?;
        self.put(PathBuf::from(layout::METADATA_FILE), &bytes).await
    }

    async fn commit(self) -> StorageResult<Vec<PathBuf>> {
        // Move any previous export aside first so the final name only ever
        // points at a complete episode.
        let previous = self.final_dir.with_extension("old");
        let had_previous = tokio::fs::try_exists(&self.final_dir)
            .await
            .map_err(|e| StorageError::io(&self.final_dir, e))?;
        if had_previous {
            remove_dir_if_exists(&previous).await?;
            tokio::fs::rename(&self.final_dir, &previous)
                .await
                .map_err(|e| StorageError::io(&self.final_dir, e))?;
        }

        tokio::fs::rename(&self.staging, &self.final_dir)
            .await
            .map_err(|e| StorageError::io(&self.staging, e))?;

        if had_previous {
            remove_dir_if_exists(&previous).await?;
        }

        tracing::info!(
            episode_index = self.episode,
            path = %self.final_dir.display(),
            files = self.written.len(),
            "Episode export committed",
        );
        Ok(self.written.iter().map(|rel| self.final_dir.join(rel)).collect())
    }

    async fn abort(self) -> StorageResult<()> {
        tracing::debug!(episode_index = self.episode, path = %self.staging.display(), "Discarding staged export");
        remove_dir_if_exists(&self.staging).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
