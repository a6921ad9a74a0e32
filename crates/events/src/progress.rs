//! Ordered export event stream.
//!
//! A run owns one bounded `mpsc` channel. Workers push through cloned
//! [`ProgressSender`]s; the caller consumes a [`ProgressStream`]. The stream
//! ends once every sender is dropped, so a finished run always yields a
//! finite sequence.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use roboqa_core::export::{progress_percentage, ExportProgress, ExportResult, ExportStage};
use roboqa_core::types::EpisodeIndex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default channel capacity for a run's event stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// One item of the export event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportEvent {
    Progress(ExportProgress),
    /// Terminal event; exactly one per episode.
    Finished(ExportResult),
}

impl ExportEvent {
    pub fn episode_index(&self) -> EpisodeIndex {
        match self {
            Self::Progress(p) => p.episode_index,
            Self::Finished(r) => r.episode_index,
        }
    }
}

/// Create a bounded event channel.
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSender { inner: tx },
        ProgressStream {
            inner: ReceiverStream::new(rx),
        },
    )
}

// ---------------------------------------------------------------------------
// Sender / stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProgressSender {
    inner: mpsc::Sender<ExportEvent>,
}

impl ProgressSender {
    /// Send an event, waiting for capacity. A dropped stream is not an
    /// error; the export keeps running without an observer.
    pub async fn send(&self, event: ExportEvent) {
        if self.inner.send(event).await.is_err() {
            tracing::debug!("Progress stream closed, event dropped");
        }
    }
}

/// The consumer side of a run's event channel.
#[derive(Debug)]
pub struct ProgressStream {
    inner: ReceiverStream<ExportEvent>,
}

impl Stream for ProgressStream {
    type Item = ExportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Per-episode progress emitter.
///
/// Emits on every stage transition and after each `batch_size` frames.
/// Percentages never decrease within one episode.
pub struct ProgressReporter {
    sender: ProgressSender,
    episode_index: EpisodeIndex,
    current_episode: usize,
    total_episodes: usize,
    batch_size: usize,
    total_frames: usize,
    current_frame: usize,
    last_percentage: f64,
    stage: ExportStage,
}

impl ProgressReporter {
    pub fn new(
        sender: ProgressSender,
        episode_index: EpisodeIndex,
        current_episode: usize,
        total_episodes: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            sender,
            episode_index,
            current_episode,
            total_episodes,
            batch_size: batch_size.max(1),
            total_frames: 0,
            current_frame: 0,
            last_percentage: 0.0,
            stage: ExportStage::Pending,
        }
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    /// Known once the frame plan is built.
    pub fn set_total_frames(&mut self, total_frames: usize) {
        self.total_frames = total_frames;
    }

    /// Move to `stage` and emit a snapshot.
    pub async fn enter(&mut self, stage: ExportStage) {
        self.stage = stage;
        self.emit().await;
    }

    /// Record `completed` frames; emits at batch boundaries and the last frame.
    pub async fn frame_done(&mut self, completed: usize) {
        self.current_frame = completed;
        if completed % self.batch_size == 0 || completed == self.total_frames {
            self.emit().await;
        }
    }

    /// Emit the terminal event. Consumes the reporter so it runs once.
    pub async fn finish(self, result: ExportResult) {
        tracing::debug!(
            episode_index = self.episode_index,
            status = %result.terminal_stage(),
            "Episode finished",
        );
        self.sender.send(ExportEvent::Finished(result)).await;
    }

    async fn emit(&mut self) {
        let pct = progress_percentage(self.current_frame, self.total_frames, self.stage).max(self.last_percentage);
        self.last_percentage = pct;
        let snapshot = ExportProgress {
            episode_index: self.episode_index,
            current_episode: self.current_episode,
            total_episodes: self.total_episodes,
            current_frame: self.current_frame,
            total_frames: self.total_frames,
            percentage: pct,
            status: self.stage,
        };
        self.sender.send(ExportEvent::Progress(snapshot)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
