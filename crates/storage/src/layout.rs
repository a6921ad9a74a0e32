//! On-disk path conventions.
//!
//! Source data root:
//!
//! ```text
//! <root>/<dataset>/episodes/episode_000003/trajectory.json
//! <root>/<dataset>/episodes/episode_000003/forces.json          (optional)
//! <root>/<dataset>/episodes/episode_000003/cameras/<cam>/frame_000000.png
//! <root>/<dataset>/annotations/episode_000003.json
//! <root>/<dataset>/edits/episode_000003.json
//! ```
//!
//! Export output:
//!
//! ```text
//! <output>/episode_000003/{trajectory.json, metadata.json}
//! <output>/episode_000003/cameras/<cam>/frame_000000.png
//! ```

use std::path::{Path, PathBuf};

use roboqa_core::types::{EpisodeIndex, FrameIndex};

pub const TRAJECTORY_FILE: &str = "trajectory.json";
pub const FORCES_FILE: &str = "forces.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const CAMERAS_DIR: &str = "cameras";
pub const EPISODES_DIR: &str = "episodes";
pub const ANNOTATIONS_DIR: &str = "annotations";
pub const EDITS_DIR: &str = "edits";

const EPISODE_PREFIX: &str = "episode_";
const FRAME_PREFIX: &str = "frame_";
const FRAME_EXT: &str = "png";

pub fn episode_dir_name(episode: EpisodeIndex) -> String {
    format!("{EPISODE_PREFIX}{episode:06}")
}

pub fn episode_file_name(episode: EpisodeIndex) -> String {
    format!("{EPISODE_PREFIX}{episode:06}.json")
}

pub fn frame_file_name(frame: FrameIndex) -> String {
    format!("{FRAME_PREFIX}{frame:06}.{FRAME_EXT}")
}

/// Staging directory name for an episode export in progress.
pub fn staging_dir_name(episode: EpisodeIndex) -> String {
    format!(".{EPISODE_PREFIX}{episode:06}.partial")
}

/// Parse `episode_000012` or `episode_000012.json` back to `12`.
pub fn parse_episode_name(name: &str) -> Option<EpisodeIndex> {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    stem.strip_prefix(EPISODE_PREFIX)?.parse().ok()
}

/// Parse `frame_000042.png` back to `42`.
pub fn parse_frame_name(name: &str) -> Option<FrameIndex> {
    name.strip_prefix(FRAME_PREFIX)?
        .strip_suffix(FRAME_EXT)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

pub fn source_episode_dir(root: &Path, dataset: &str, episode: EpisodeIndex) -> PathBuf {
    root.join(dataset).join(EPISODES_DIR).join(episode_dir_name(episode))
}

pub fn annotation_path(root: &Path, dataset: &str, episode: EpisodeIndex) -> PathBuf {
    root.join(dataset).join(ANNOTATIONS_DIR).join(episode_file_name(episode))
}

pub fn edits_path(root: &Path, dataset: &str, episode: EpisodeIndex) -> PathBuf {
    root.join(dataset).join(EDITS_DIR).join(episode_file_name(episode))
}
