//! Export result, progress and metadata records.
//!
//! These are the values the export pipeline hands back to callers. They
//! carry no wall-clock timestamps except `processing_time_seconds`, so two
//! exports of the same input produce identical metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::plan::{GripperPolicy, PlannedFrame};
use crate::types::EpisodeIndex;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Per-episode export state.
///
/// `Pending → ReadingSource → ApplyingTrajectoryEdits → ApplyingFrameEdits
/// → WritingOutput → Done`, or `Failed` / `Cancelled` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportStage {
    Pending,
    ReadingSource,
    ApplyingTrajectoryEdits,
    ApplyingFrameEdits,
    WritingOutput,
    Done,
    Failed,
    Cancelled,
}

impl ExportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ReadingSource => "reading-source",
            Self::ApplyingTrajectoryEdits => "applying-trajectory-edits",
            Self::ApplyingFrameEdits => "applying-frame-edits",
            Self::WritingOutput => "writing-output",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ExportStage) -> bool {
        use ExportStage::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, ReadingSource)
                | (ReadingSource, ApplyingTrajectoryEdits)
                | (ApplyingTrajectoryEdits, ApplyingFrameEdits)
                | (ApplyingFrameEdits, WritingOutput)
                | (WritingOutput, Done)
        )
    }
}

impl std::fmt::Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStats {
    pub frames_written: usize,
    pub size_bytes: u64,
    pub processing_time_seconds: f64,
}

/// Outcome of exporting one episode. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub episode_index: EpisodeIndex,
    pub success: bool,
    pub output_files: Vec<PathBuf>,
    pub error: Option<String>,
    pub stats: ExportStats,
    /// Cancellation is a terminal state of its own, not a failure.
    #[serde(default)]
    pub cancelled: bool,
    /// The stage the episode was in when it failed.
    #[serde(default)]
    pub failed_stage: Option<ExportStage>,
}

impl ExportResult {
    pub fn succeeded(episode_index: EpisodeIndex, output_files: Vec<PathBuf>, stats: ExportStats) -> Self {
        Self {
            episode_index,
            success: true,
            output_files,
            error: None,
            stats,
            cancelled: false,
            failed_stage: None,
        }
    }

    pub fn failed(
        episode_index: EpisodeIndex,
        stage: ExportStage,
        error: impl Into<String>,
        processing_time_seconds: f64,
    ) -> Self {
        Self {
            episode_index,
            success: false,
            output_files: Vec::new(),
            error: Some(error.into()),
            stats: ExportStats {
                processing_time_seconds,
                ..ExportStats::default()
            },
            cancelled: false,
            failed_stage: Some(stage),
        }
    }

    pub fn cancelled(episode_index: EpisodeIndex, processing_time_seconds: f64) -> Self {
        Self {
            episode_index,
            success: false,
            output_files: Vec::new(),
            error: None,
            stats: ExportStats {
                processing_time_seconds,
                ..ExportStats::default()
            },
            cancelled: true,
            failed_stage: None,
        }
    }

    /// The terminal stage this result represents.
    pub fn terminal_stage(&self) -> ExportStage {
        if self.success {
            ExportStage::Done
        } else if self.cancelled {
            ExportStage::Cancelled
        } else {
            ExportStage::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Snapshot of one episode's export progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub episode_index: EpisodeIndex,
    /// 1-based position of the episode in the batch.
    pub current_episode: usize,
    pub total_episodes: usize,
    pub current_frame: usize,
    pub total_frames: usize,
    pub percentage: f64,
    pub status: ExportStage,
}

/// Percentage of `current` over `total`, in `[0, 100]`. An empty episode is
/// complete only once it reaches `Done`.
pub fn progress_percentage(current: usize, total: usize, stage: ExportStage) -> f64 {
    if stage == ExportStage::Done {
        return 100.0;
    }
    if total == 0 {
        return 0.0;
    }
    (current.min(total) as f64 / total as f64) * 100.0
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// The `metadata.json` written next to an exported episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub dataset: String,
    pub episode_index: EpisodeIndex,
    pub source_frame_count: usize,
    pub frame_count: usize,
    pub cameras: Vec<String>,
    pub joint_dims: usize,
    pub pose_dims: usize,
    pub edits_applied: bool,
    pub gripper_policy: GripperPolicy,
    /// Output position `i` is produced from `frame_map[i]`.
    pub frame_map: Vec<PlannedFrame>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let chain = [
            ExportStage::Pending,
            ExportStage::ReadingSource,
            ExportStage::ApplyingTrajectoryEdits,
            ExportStage::ApplyingFrameEdits,
            ExportStage::WritingOutput,
            ExportStage::Done,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_stages_rejected() {
        assert!(!ExportStage::Pending.can_transition_to(ExportStage::WritingOutput));
        assert!(!ExportStage::Done.can_transition_to(ExportStage::Failed));
        assert!(ExportStage::ApplyingFrameEdits.can_transition_to(ExportStage::Cancelled));
    }

    #[test]
    fn stage_serializes_kebab_case() {
        let json = serde_json::to_string(&ExportStage::ApplyingTrajectoryEdits).unwrap();
        assert_eq!(json, "\"applying-trajectory-edits\"");
        assert_eq!(ExportStage::ReadingSource.to_string(), "reading-source");
    }

    #[test]
    fn result_terminal_stage() {
        assert_eq!(
            ExportResult::succeeded(1, vec![], ExportStats::default()).terminal_stage(),
            ExportStage::Done
        );
        let failed = ExportResult::failed(2, ExportStage::ReadingSource, "boom", 0.1);
        assert_eq!(failed.terminal_stage(), ExportStage::Failed);
        assert_eq!(failed.failed_stage, Some(ExportStage::ReadingSource));
        assert_eq!(ExportResult::cancelled(3, 0.0).terminal_stage(), ExportStage::Cancelled);
    }

    #[test]
    fn percentage_bounds() {
        assert_eq!(progress_percentage(0, 10, ExportStage::ReadingSource), 0.0);
        assert_eq!(progress_percentage(5, 10, ExportStage::ApplyingFrameEdits), 50.0);
        assert_eq!(progress_percentage(12, 10, ExportStage::WritingOutput), 100.0);
        assert_eq!(progress_percentage(0, 0, ExportStage::WritingOutput), 0.0);
        assert_eq!(progress_percentage(0, 0, ExportStage::Done), 100.0);
    }
}
