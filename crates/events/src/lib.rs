//! Event plumbing for annotation changes and export progress.
//!
//! - [`EventBus`]: in-process publish/subscribe hub for [`DomainEvent`]s,
//!   backed by `tokio::sync::broadcast`. Observers may lag and drop events.
//! - [`progress_channel`]: the bounded, ordered per-run export event stream.
//!   Every episode ends in exactly one [`ExportEvent::Finished`].

pub mod bus;
pub mod progress;

pub use bus::{DomainEvent, EventBus};
pub use progress::{progress_channel, ExportEvent, ProgressReporter, ProgressSender, ProgressStream};
