//! In-memory backend for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use roboqa_core::annotation::EpisodeAnnotationFile;
use roboqa_core::edit::EditModel;
use roboqa_core::export::EpisodeMetadata;
use roboqa_core::trajectory::TrajectoryPoint;
use roboqa_core::types::{EpisodeIndex, FrameIndex};
use tokio::sync::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::layout;
use crate::store::{AnnotationStore, EditStore, EpisodeSource, EpisodeWriter, ExportSink};

type Key = (String, EpisodeIndex);

fn key(dataset: &str, episode: EpisodeIndex) -> Key {
    (dataset.to_string(), episode)
}

fn missing(what: String) -> StorageError {
    StorageError::io(
        PathBuf::from(format!("memory://{what}")),
        std::io::Error::new(ErrorKind::NotFound, "not found"),
    )
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A source episode held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEpisode {
    pub trajectory: Option<Vec<TrajectoryPoint>>,
    pub forces: Option<Vec<Vec<f64>>>,
    /// Camera name → frames in index order.
    pub cameras: BTreeMap<String, Vec<DynamicImage>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    episodes: RwLock<HashMap<Key, MemoryEpisode>>,
    annotations: RwLock<HashMap<Key, EpisodeAnnotationFile>>,
    edits: RwLock<HashMap<Key, EditModel>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_episode(&self, dataset: &str, episode: EpisodeIndex, data: MemoryEpisode) {
        self.episodes.write().await.insert(key(dataset, episode), data);
    }
}

impl AnnotationStore for MemoryStore {
    async fn get_annotation(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EpisodeAnnotationFile>> {
        Ok(self.annotations.read().await.get(&key(dataset, episode)).cloned())
    }

    async fn save_annotation(&self, file: &EpisodeAnnotationFile) -> StorageResult<()> {
        self.annotations
            .write()
            .await
            .insert(key(file.dataset(), file.episode_index()), file.clone());
        Ok(())
    }

    async fn list_annotated_episodes(&self, dataset: &str) -> StorageResult<Vec<EpisodeIndex>> {
        let mut episodes: Vec<EpisodeIndex> = self
            .annotations
            .read()
            .await
            .keys()
            .filter(|(ds, _)| ds == dataset)
            .map(|(_, ep)| *ep)
            .collect();
        episodes.sort_unstable();
        Ok(episodes)
    }

    async fn delete_annotation(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<bool> {
        Ok(self.annotations.write().await.remove(&key(dataset, episode)).is_some())
    }
}

impl EditStore for MemoryStore {
    async fn get_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EditModel>> {
        Ok(self.edits.read().await.get(&key(dataset, episode)).cloned())
    }

    async fn save_edits(&self, edits: &EditModel) -> StorageResult<()> {
        self.edits
            .write()
            .await
            .insert(key(&edits.dataset, edits.episode_index), edits.clone());
        Ok(())
    }

    async fn delete_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<bool> {
        Ok(self.edits.write().await.remove(&key(dataset, episode)).is_some())
    }
}

impl EpisodeSource for MemoryStore {
    async fn list_episodes(&self, dataset: &str) -> StorageResult<Vec<EpisodeIndex>> {
        let mut episodes: Vec<EpisodeIndex> = self
            .episodes
            .read()
            .await
            .iter()
            .filter(|((ds, _), data)| ds == dataset && data.trajectory.is_some())
            .map(|((_, ep), _)| *ep)
            .collect();
        episodes.sort_unstable();
        Ok(episodes)
    }

    async fn load_trajectory(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<Vec<TrajectoryPoint>>> {
        Ok(self
            .episodes
            .read()
            .await
            .get(&key(dataset, episode))
            .and_then(|e| e.trajectory.clone()))
    }

    async fn load_forces(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<Vec<Vec<f64>>>> {
        Ok(self
            .episodes
            .read()
            .await
            .get(&key(dataset, episode))
            .and_then(|e| e.forces.clone()))
    }

    async fn camera_names(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Vec<String>> {
        Ok(self
            .episodes
            .read()
            .await
            .get(&key(dataset, episode))
            .map(|e| e.cameras.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn frame_count(&self, dataset: &str, episode: EpisodeIndex, camera: &str) -> StorageResult<usize> {
        Ok(self
            .episodes
            .read()
            .await
            .get(&key(dataset, episode))
            .and_then(|e| e.cameras.get(camera))
            .map_or(0, Vec::len))
    }

    async fn load_frame(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        camera: &str,
        frame: FrameIndex,
    ) -> StorageResult<DynamicImage> {
        self.episodes
            .read()
            .await
            .get(&key(dataset, episode))
            .and_then(|e| e.cameras.get(camera))
            .and_then(|frames| frames.get(frame))
            .cloned()
            .ok_or_else(|| missing(format!("{dataset}/{episode}/{camera}/{frame}")))
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// A committed in-memory export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedEpisode {
    /// Camera name → (output frame index, image) in write order.
    pub frames: BTreeMap<String, Vec<(FrameIndex, DynamicImage)>>,
    pub trajectory: Vec<TrajectoryPoint>,
    pub metadata: Option<EpisodeMetadata>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    committed: Arc<Mutex<BTreeMap<EpisodeIndex, ExportedEpisode>>>,
    aborted: Arc<Mutex<Vec<EpisodeIndex>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn committed(&self) -> BTreeMap<EpisodeIndex, ExportedEpisode> {
        self.committed.lock().await.clone()
    }

    pub async fn get(&self, episode: EpisodeIndex) -> Option<ExportedEpisode> {
        self.committed.lock().await.get(&episode).cloned()
    }

    /// Episodes whose writer was aborted, in abort order.
    pub async fn aborted(&self) -> Vec<EpisodeIndex> {
        self.aborted.lock().await.clone()
    }
}

impl ExportSink for MemorySink {
    type Writer = MemoryEpisodeWriter;

    async fn begin(&self, episode: EpisodeIndex) -> StorageResult<MemoryEpisodeWriter> {
        Ok(MemoryEpisodeWriter {
            episode,
            staged: ExportedEpisode::default(),
            committed: Arc::clone(&self.committed),
            aborted: Arc::clone(&self.aborted),
        })
    }
}

pub struct MemoryEpisodeWriter {
    episode: EpisodeIndex,
    staged: ExportedEpisode,
    committed: Arc<Mutex<BTreeMap<EpisodeIndex, ExportedEpisode>>>,
    aborted: Arc<Mutex<Vec<EpisodeIndex>>>,
}

impl MemoryEpisodeWriter {
    fn record(&mut self, relative: PathBuf) {
        self.staged
            .files
            .push(PathBuf::from(layout::episode_dir_name(self.episode)).join(relative));
    }
}

impl EpisodeWriter for MemoryEpisodeWriter {
    async fn write_frame(&mut self, camera: &str, frame: FrameIndex, image: &DynamicImage) -> StorageResult<u64> {
        let bytes = image.as_bytes().len() as u64;
        self.staged
            .frames
            .entry(camera.to_string())
            .or_default()
            .push((frame, image.clone()));
        self.record(
            PathBuf::from(layout::CAMERAS_DIR)
                .join(camera)
                .join(layout::frame_file_name(frame)),
        );
        Ok(bytes)
    }

    async fn write_trajectory(&mut self, points: &[TrajectoryPoint]) -> StorageResult<u64> {
        let bytes = serde_json::to_vec(points).map_err(|e| StorageError::json(layout::TRAJECTORY_FILE, e))?;
        self.staged.trajectory = points.to_vec();
        self.record(PathBuf::from(layout::TRAJECTORY_FILE));
        Ok(bytes.len() as u64)
    }

    async fn write_metadata(&mut self, metadata: &EpisodeMetadata) -> StorageResult<u64> {
        let bytes = serde_json::to_vec(metadata).map_err(|e| StorageError::json(layout::METADATA_FILE, e))?;
        self.staged.metadata = Some(metadata.clone());
        self.record(PathBuf::from(layout::METADATA_FILE));
        Ok(bytes.len() as u64)
    }

    async fn commit(self) -> StorageResult<Vec<PathBuf>> {
        let files = self.staged.files.clone();
        self.committed.lock().await.insert(self.episode, self.staged);
        Ok(files)
    }

    async fn abort(self) -> StorageResult<()> {
        self.aborted.lock().await.push(self.episode);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn img(v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(2, 2, Rgb([v, v, v])))
    }

    #[tokio::test]
    async fn source_accessors() {
        let store = MemoryStore::new();
        let mut cameras = BTreeMap::new();
        cameras.insert("top".to_string(), vec![img(1), img(2)]);
        store
            .insert_episode("ds", 3, MemoryEpisode { trajectory: Some(vec![]), forces: None, cameras })
            .await;
        store.insert_episode("ds", 4, MemoryEpisode::default()).await;

        assert_eq!(store.list_episodes("ds").await.unwrap(), vec![3]);
        assert_eq!(store.camera_names("ds", 3).await.unwrap(), vec!["top".to_string()]);
        assert_eq!(store.frame_count("ds", 3, "top").await.unwrap(), 2);
        assert_eq!(store.load_frame("ds", 3, "top", 1).await.unwrap(), img(2));
        assert!(store.load_frame("ds", 3, "top", 2).await.is_err());
        assert!(store.load_trajectory("other", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sink_only_exposes_committed_episodes() {
        let sink = MemorySink::new();

        let mut w = sink.begin(1).await.unwrap();
        w.write_frame("top", 0, &img(5)).await.unwrap();
        let files = w.commit().await.unwrap();
        assert_eq!(files, vec![PathBuf::from("episode_000001/cameras/top/frame_000000.png")]);

        let mut w = sink.begin(2).await.unwrap();
        w.write_frame("top", 0, &img(5)).await.unwrap();
        w.abort().await.unwrap();

        let committed = sink.committed().await;
        assert_eq!(committed.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(sink.aborted().await, vec![2]);
    }

    #[tokio::test]
    async fn edits_round_trip() {
        let store = MemoryStore::new();
        let mut edits = EditModel::new("ds", 1);
        edits.remove_frame(2);
        store.save_edits(&edits).await.unwrap();
        assert_eq!(store.get_edits("ds", 1).await.unwrap(), Some(edits));
        assert!(store.delete_edits("ds", 1).await.unwrap());
        assert!(store.get_edits("ds", 1).await.unwrap().is_none());
    }
}
