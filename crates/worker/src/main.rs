use std::sync::Arc;

use anyhow::{bail, Context};
use roboqa_events::{DomainEvent, EventBus};
use roboqa_pipeline::ExportPipeline;
use roboqa_storage::{AnnotationService, EpisodeSource, LocalSink, LocalStore};
use roboqa_worker::analysis::{suggest_annotations, AnalysisOutcome};
use roboqa_worker::config::WorkerConfig;
use roboqa_worker::export::{build_request, run_export, ExportSummary};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roboqa_worker=debug,roboqa_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        dataset = %config.dataset,
        data_root = %config.data_root.display(),
        output_dir = %config.output_dir.display(),
        analyze = config.analyze,
        apply_edits = config.export.apply_edits,
        "Worker starting",
    );

    let store = Arc::new(LocalStore::new(&config.data_root));
    let sink = Arc::new(LocalSink::new(&config.output_dir));
    let bus = Arc::new(EventBus::default());
    tokio::spawn(log_domain_events(bus.subscribe()));

    let service = AnnotationService::new(Arc::clone(&store)).with_event_bus(Arc::clone(&bus));

    let episodes = match &config.episodes {
        Some(episodes) => episodes.clone(),
        None => store
            .list_episodes(&config.dataset)
            .await
            .with_context(|| format!("failed to list episodes of {}", config.dataset))?,
    };
    if episodes.is_empty() {
        tracing::info!(dataset = %config.dataset, "No episodes to process");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    if config.analyze {
        let outcomes = suggest_annotations(&service, &config.dataset, &episodes, &cancel).await;
        let suggested = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AnalysisOutcome::Suggested { .. }))
            .count();
        tracing::info!(dataset = %config.dataset, analyzed = outcomes.len(), suggested, "Analysis finished");
    }

    let request = build_request(&service, &config.dataset, &episodes, config.export.apply_edits).await?;
    let pipeline = ExportPipeline::new(store, sink, config.export.clone());
    let results = run_export(&pipeline, request, cancel).await;

    let summary = ExportSummary::from_results(&results);
    tracing::info!(
        dataset = %config.dataset,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Worker finished",
    );

    if summary.failed > 0 {
        bail!("{} of {} episodes failed to export", summary.failed, results.len());
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::warn!("Interrupt received, cancelling after the current frame");
            cancel.cancel();
        }
        Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
    }
}

async fn log_domain_events(mut rx: broadcast::Receiver<DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(
                event_type = %event.event_type,
                dataset = %event.dataset,
                episode_index = event.episode_index,
                "Domain event",
            ),
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Domain event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
