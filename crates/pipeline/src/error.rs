use roboqa_core::export::ExportStage;
use roboqa_core::types::EpisodeIndex;
use roboqa_core::CoreError;
use roboqa_storage::StorageError;

/// What went wrong while exporting one episode.
#[derive(Debug, thiserror::Error)]
pub enum ExportFailure {
    #[error("source episode not found")]
    MissingEpisode,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// An export failure with the episode and stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("episode {episode_index} failed during {stage}: {source}")]
pub struct ExportError {
    pub episode_index: EpisodeIndex,
    pub stage: ExportStage,
    #[source]
    pub source: ExportFailure,
}

impl ExportError {
    pub fn new(episode_index: EpisodeIndex, stage: ExportStage, source: impl Into<ExportFailure>) -> Self {
        Self {
            episode_index,
            stage,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_episode_and_stage() {
        let err = ExportError::new(2, ExportStage::ReadingSource, ExportFailure::MissingEpisode);
        assert_eq!(
            err.to_string(),
            "episode 2 failed during reading-source: source episode not found"
        );
    }

    #[test]
    fn wraps_core_errors() {
        let err = ExportError::new(
            0,
            ExportStage::ApplyingTrajectoryEdits,
            CoreError::Validation("bad".into()),
        );
        assert!(err.to_string().ends_with("Validation failed: bad"));
    }
}
