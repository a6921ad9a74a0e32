//! Batch export orchestration.
//!
//! Each episode runs in its own tokio task, gated by a semaphore sized to
//! `ExportConfig::workers`. Every episode emits exactly one
//! [`ExportEvent::Finished`], including episodes that never started because
//! the run was cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use roboqa_core::export::{ExportResult, ExportStage, ExportStats};
use roboqa_core::types::EpisodeIndex;
use roboqa_events::progress::{progress_channel, ExportEvent, ProgressReporter, ProgressSender, ProgressStream};
use roboqa_storage::{EpisodeSource, ExportSink};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ExportConfig, ExportRequest};
use crate::episode::{EpisodeJob, EpisodeOutcome};

// ---------------------------------------------------------------------------
// ExportRun
// ---------------------------------------------------------------------------

/// A running export batch.
///
/// The event stream is bounded: drain `events` (or drop it) while the run
/// is in progress. [`ExportRun::collect`] does both for callers that only
/// want the outcome.
pub struct ExportRun {
    pub events: ProgressStream,
    handle: JoinHandle<Vec<ExportResult>>,
    cancel: CancellationToken,
}

impl ExportRun {
    /// Request cooperative cancellation of the whole run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every event, then return them with the per-episode results in
    /// request order.
    pub async fn collect(mut self) -> (Vec<ExportEvent>, Vec<ExportResult>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        let results = match self.handle.await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "Export driver task failed");
                events
                    .iter()
                    .filter_map(|ev| match ev {
                        ExportEvent::Finished(r) => Some(r.clone()),
                        ExportEvent::Progress(_) => None,
                    })
                    .collect()
            }
        };
        (events, results)
    }

    /// Wait for the results, discarding progress.
    pub async fn finish(self) -> Vec<ExportResult> {
        self.collect().await.1
    }
}

// ---------------------------------------------------------------------------
// ExportPipeline
// ---------------------------------------------------------------------------

pub struct ExportPipeline<S, K> {
    source: Arc<S>,
    sink: Arc<K>,
    config: Arc<ExportConfig>,
}

impl<S, K> ExportPipeline<S, K>
where
    S: EpisodeSource + 'static,
    K: ExportSink + 'static,
{
    pub fn new(source: Arc<S>, sink: Arc<K>, config: ExportConfig) -> Self {
        Self {
            source,
            sink,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Start exporting `request`. Cancelling `cancel` stops the run between
    /// frames; completed episodes stay committed.
    pub fn export_episodes(&self, request: ExportRequest, cancel: CancellationToken) -> ExportRun {
        let (events, stream) = progress_channel(self.config.stream_capacity);
        // A child token lets fail-fast stop this run without touching the caller's token.
        let run_cancel = cancel.child_token();

        let handle = tokio::spawn(run_batch(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            Arc::clone(&self.config),
            request,
            events,
            run_cancel.clone(),
        ));

        ExportRun {
            events: stream,
            handle,
            cancel: run_cancel,
        }
    }
}

/// Export `request` from `source` into `sink`.
pub fn export_episodes<S, K>(
    source: Arc<S>,
    sink: Arc<K>,
    request: ExportRequest,
    config: ExportConfig,
    cancel: CancellationToken,
) -> ExportRun
where
    S: EpisodeSource + 'static,
    K: ExportSink + 'static,
{
    ExportPipeline::new(source, sink, config).export_episodes(request, cancel)
}

async fn run_batch<S, K>(
    source: Arc<S>,
    sink: Arc<K>,
    config: Arc<ExportConfig>,
    mut request: ExportRequest,
    events: ProgressSender,
    cancel: CancellationToken,
) -> Vec<ExportResult>
where
    S: EpisodeSource + 'static,
    K: ExportSink + 'static,
{
    let mut seen = HashSet::new();
    let episodes: Vec<EpisodeIndex> = std::mem::take(&mut request.episodes)
        .into_iter()
        .filter(|ep| {
            let fresh = seen.insert(*ep);
            if !fresh {
                tracing::warn!(episode_index = *ep, "Duplicate episode in export request ignored");
            }
            fresh
        })
        .collect();

    let total = episodes.len();
    let dataset: Arc<str> = Arc::from(request.dataset.as_str());
    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let batch_started = Instant::now();

    tracing::info!(
        dataset = %dataset,
        episodes = total,
        workers = config.workers.max(1),
        apply_edits = config.apply_edits,
        fail_fast = config.fail_fast,
        "Export batch started",
    );

    let mut handles = Vec::with_capacity(total);
    for (position, episode) in episodes.into_iter().enumerate() {
        let edits = request.take_edits(episode);
        let source = Arc::clone(&source);
        let sink = Arc::clone(&sink);
        let config = Arc::clone(&config);
        let dataset = Arc::clone(&dataset);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let mut reporter = ProgressReporter::new(events.clone(), episode, position + 1, total, config.progress_batch_size);

        let task = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };

            let result = match permit {
                None => ExportResult::cancelled(episode, 0.0),
                Some(_permit) => {
                    let started = Instant::now();
                    let job = EpisodeJob {
                        source: source.as_ref(),
                        sink: sink.as_ref(),
                        dataset: &dataset,
                        episode,
                        edits: edits.as_ref(),
                        config: &config,
                        cancel: &cancel,
                    };
                    let outcome = job.run(&mut reporter).await;
                    let elapsed = started.elapsed().as_secs_f64();

                    match outcome {
                        Ok(EpisodeOutcome::Completed {
                            files,
                            frames_written,
                            size_bytes,
                        }) => ExportResult::succeeded(
                            episode,
                            files,
                            ExportStats {
                                frames_written,
                                size_bytes,
                                processing_time_seconds: elapsed,
                            },
                        ),
                        Ok(EpisodeOutcome::Cancelled) => {
                            tracing::info!(episode_index = episode, stage = %reporter.stage(), "Episode export cancelled");
                            ExportResult::cancelled(episode, elapsed)
                        }
                        Err(e) => {
                            tracing::warn!(
                                episode_index = episode,
                                stage = %e.stage,
                                error = %e.source,
                                "Episode export failed",
                            );
                            if config.fail_fast {
                                cancel.cancel();
                            }
                            ExportResult::failed(episode, e.stage, e.source.to_string(), elapsed)
                        }
                    }
                }
            };

            reporter.finish(result.clone()).await;
            result
        });
        handles.push((episode, task));
    }

    let mut results = Vec::with_capacity(total);
    for (episode, task) in handles {
        match task.await {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::error!(episode_index = episode, error = %e, "Export task panicked");
                let result =
                    ExportResult::failed(episode, ExportStage::Pending, format!("export task panicked: {e}"), 0.0);
                events.send(ExportEvent::Finished(result.clone())).await;
                results.push(result);
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let cancelled = results.iter().filter(|r| r.cancelled).count();
    tracing::info!(
        dataset = %dataset,
        succeeded,
        failed = results.len() - succeeded - cancelled,
        cancelled,
        elapsed_secs = batch_started.elapsed().as_secs_f64(),
        "Export batch finished",
    );
    results
}
