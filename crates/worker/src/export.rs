//! Export step of a worker run: gather overlays, run the batch, log progress.

use futures::StreamExt;
use roboqa_core::export::ExportResult;
use roboqa_core::types::EpisodeIndex;
use roboqa_events::ExportEvent;
use roboqa_pipeline::{ExportPipeline, ExportRequest};
use roboqa_storage::{AnnotationService, EditStore, EpisodeSource, ExportSink};
use tokio_util::sync::CancellationToken;

/// Build the export request, attaching each episode's saved overlay.
pub async fn build_request<S: EditStore>(
    service: &AnnotationService<S>,
    dataset: &str,
    episodes: &[EpisodeIndex],
    apply_edits: bool,
) -> anyhow::Result<ExportRequest> {
    let mut request = ExportRequest::new(dataset, episodes.iter().copied());
    if !apply_edits {
        return Ok(request);
    }

    let mut with_edits = 0usize;
    for &episode in episodes {
        if let Some(edits) = service.get_edits(dataset, episode).await? {
            if !edits.is_empty() {
                with_edits += 1;
                request = request.with_edits(edits);
            }
        }
    }
    tracing::info!(dataset, episodes = episodes.len(), with_edits, "Export request built");
    Ok(request)
}

/// Run the batch to completion, logging every progress event.
pub async fn run_export<S, K>(
    pipeline: &ExportPipeline<S, K>,
    request: ExportRequest,
    cancel: CancellationToken,
) -> Vec<ExportResult>
where
    S: EpisodeSource + 'static,
    K: ExportSink + 'static,
{
    let mut run = pipeline.export_episodes(request, cancel);
    while let Some(event) = run.events.next().await {
        match event {
            ExportEvent::Progress(p) => tracing::debug!(
                episode_index = p.episode_index,
                episode = p.current_episode,
                of = p.total_episodes,
                frame = p.current_frame,
                frames = p.total_frames,
                percentage = p.percentage,
                status = %p.status,
                "Export progress",
            ),
            ExportEvent::Finished(r) if r.success => tracing::info!(
                episode_index = r.episode_index,
                frames = r.stats.frames_written,
                bytes = r.stats.size_bytes,
                secs = r.stats.processing_time_seconds,
                "Episode exported",
            ),
            ExportEvent::Finished(r) => tracing::warn!(
                episode_index = r.episode_index,
                status = %r.terminal_stage(),
                error = r.error.as_deref().unwrap_or(""),
                "Episode not exported",
            ),
        }
    }
    run.finish().await
}

/// Counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ExportSummary {
    pub fn from_results(results: &[ExportResult]) -> Self {
        results.iter().fold(Self::default(), |mut s, r| {
            if r.success {
                s.succeeded += 1;
            } else if r.cancelled {
                s.cancelled += 1;
            } else {
                s.failed += 1;
            }
            s
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use roboqa_core::edit::EditModel;
    use roboqa_core::export::{ExportStage, ExportStats};
    use roboqa_pipeline::ExportConfig;
    use roboqa_storage::{MemoryEpisode, MemorySink, MemoryStore};

    #[tokio::test]
    async fn request_skips_empty_overlays() {
        let store = Arc::new(MemoryStore::new());
        let service = AnnotationService::new(Arc::clone(&store));

        let mut edits = EditModel::new("ds", 1);
        edits.remove_frame(0);
        service.save_edits(&edits).await.unwrap();
        service.save_edits(&EditModel::new("ds", 2)).await.unwrap();

        let request = build_request(&service, "ds", &[1, 2, 3], true).await.unwrap();
        assert!(request.edits_for(1).is_some());
        assert!(request.edits_for(2).is_none());

        let request = build_request(&service, "ds", &[1], false).await.unwrap();
        assert!(request.edits_for(1).is_none());
    }

    #[tokio::test]
    async fn runs_batch_and_summarizes() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_episode(
                "ds",
                0,
                MemoryEpisode {
                    trajectory: Some(Vec::new()),
                    forces: None,
                    cameras: BTreeMap::new(),
                },
            )
            .await;
        let pipeline = ExportPipeline::new(store, Arc::new(MemorySink::new()), ExportConfig::default());

        let results = run_export(&pipeline, ExportRequest::new("ds", [0, 9]), CancellationToken::new()).await;
        let summary = ExportSummary::from_results(&results);
        assert_eq!(
            summary,
            ExportSummary {
                succeeded: 1,
                failed: 1,
                cancelled: 0
            }
        );
    }

    #[test]
    fn summary_counts_cancelled_separately() {
        let results = vec![
            ExportResult::succeeded(0, Vec::new(), ExportStats::default()),
            ExportResult::failed(1, ExportStage::WritingOutput, String::from("disk full"), 0.1),
            ExportResult::cancelled(2, 0.0),
        ];
        assert_eq!(
            ExportSummary::from_results(&results),
            ExportSummary {
                succeeded: 1,
                failed: 1,
                cancelled: 1
            }
        );
    }
}
