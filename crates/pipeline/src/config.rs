use std::collections::HashMap;

use roboqa_core::edit::EditModel;
use roboqa_core::plan::GripperPolicy;
use roboqa_core::types::EpisodeIndex;
use roboqa_events::progress::DEFAULT_STREAM_CAPACITY;
use serde::{Deserialize, Serialize};

/// Default number of episodes exported concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of frames between progress events.
pub const DEFAULT_PROGRESS_BATCH: usize = 10;

/// Tuning for one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Episodes processed in parallel (minimum 1).
    pub workers: usize,
    pub progress_batch_size: usize,
    /// Stop the batch at the first failure; unfinished episodes end cancelled.
    pub fail_fast: bool,
    /// When `false`, edit overlays are ignored and sources exported as-is.
    pub apply_edits: bool,
    pub gripper_policy: GripperPolicy,
    pub stream_capacity: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            progress_batch_size: DEFAULT_PROGRESS_BATCH,
            fail_fast: false,
            apply_edits: true,
            gripper_policy: GripperPolicy::default(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

/// Which episodes to export and with which overlays.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub dataset: String,
    /// Exported in this order; results come back in the same order.
    pub episodes: Vec<EpisodeIndex>,
    edits: HashMap<EpisodeIndex, EditModel>,
}

impl ExportRequest {
    pub fn new(dataset: impl Into<String>, episodes: impl IntoIterator<Item = EpisodeIndex>) -> Self {
        Self {
            dataset: dataset.into(),
            episodes: episodes.into_iter().collect(),
            edits: HashMap::new(),
        }
    }

    /// Attach an overlay; it applies to `edits.episode_index`.
    pub fn with_edits(mut self, edits: EditModel) -> Self {
        self.edits.insert(edits.episode_index, edits);
        self
    }

    pub fn edits_for(&self, episode: EpisodeIndex) -> Option<&EditModel> {
        self.edits.get(&episode)
    }

    pub(crate) fn take_edits(&mut self, episode: EpisodeIndex) -> Option<EditModel> {
        self.edits.remove(&episode)
    }
}
