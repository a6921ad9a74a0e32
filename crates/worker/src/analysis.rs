//! Automatic quality suggestions saved alongside human annotations.

use roboqa_core::anomaly::detect_anomalies;
use roboqa_core::annotation::EpisodeAnnotation;
use roboqa_core::quality::analyze_trajectory;
use roboqa_core::types::EpisodeIndex;
use roboqa_storage::{AnnotationService, AnnotationStore, EpisodeSource};
use tokio_util::sync::CancellationToken;

/// What happened to one episode during analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Suggested { overall_score: u8, anomalies: usize },
    /// No trajectory for the episode.
    Skipped,
    Failed(String),
}

/// Analyze each episode and save the result as the `auto-suggest`
/// annotator's entry. Stops early when `cancel` fires.
pub async fn suggest_annotations<S>(
    service: &AnnotationService<S>,
    dataset: &str,
    episodes: &[EpisodeIndex],
    cancel: &CancellationToken,
) -> Vec<(EpisodeIndex, AnalysisOutcome)>
where
    S: AnnotationStore + EpisodeSource,
{
    let mut outcomes = Vec::with_capacity(episodes.len());
    for &episode in episodes {
        if cancel.is_cancelled() {
            tracing::info!(dataset, remaining = episodes.len() - outcomes.len(), "Analysis cancelled");
            break;
        }
        let outcome = match suggest_one(service, dataset, episode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(dataset, episode_index = episode, error = %e, "Episode analysis failed");
                AnalysisOutcome::Failed(e.to_string())
            }
        };
        outcomes.push((episode, outcome));
    }
    outcomes
}

async fn suggest_one<S>(
    service: &AnnotationService<S>,
    dataset: &str,
    episode: EpisodeIndex,
) -> anyhow::Result<AnalysisOutcome>
where
    S: AnnotationStore + EpisodeSource,
{
    let store = service.store();
    let Some(points) = store.load_trajectory(dataset, episode).await? else {
        tracing::debug!(dataset, episode_index = episode, "No trajectory, skipping analysis");
        return Ok(AnalysisOutcome::Skipped);
    };
    let forces = store.load_forces(dataset, episode).await?;

    let metrics = analyze_trajectory(&points)?;
    let anomalies = detect_anomalies(&points, forces.as_deref())?;
    let found = anomalies.len();

    tracing::info!(
        dataset,
        episode_index = episode,
        overall_score = metrics.overall_score,
        smoothness = metrics.smoothness,
        efficiency = metrics.efficiency,
        anomalies = found,
        "Episode analyzed",
    );

    let suggestion = EpisodeAnnotation::suggestion(&metrics, anomalies);
    service.save_annotation(dataset, episode, suggestion).await?;

    Ok(AnalysisOutcome::Suggested {
        overall_score: metrics.overall_score,
        anomalies: found,
    })
}
