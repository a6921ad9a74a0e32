//! Batch export of episodes with their edit overlays applied.
//!
//! Per episode: `pending → reading-source → applying-trajectory-edits →
//! applying-frame-edits → writing-output → done`, or `failed` / `cancelled`.
//! One episode's failure never aborts the batch unless
//! [`ExportConfig::fail_fast`] is set.

pub mod config;
mod episode;
pub mod error;
pub mod pipeline;

pub use config::{ExportConfig, ExportRequest};
pub use error::{ExportError, ExportFailure};
pub use pipeline::{export_episodes, ExportPipeline, ExportRun};
