//! Persistence for annotations, edit overlays, source episodes and exports.
//!
//! The contracts live in [`store`]; [`local`] is the filesystem backend
//! used by the worker and [`memory`] backs tests and embedding callers.

pub mod error;
pub mod layout;
pub mod local;
pub mod memory;
pub mod service;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use local::{LocalSink, LocalStore};
pub use memory::{MemoryEpisode, MemorySink, MemoryStore};
pub use service::AnnotationService;
pub use store::{AnnotationStore, EditStore, EpisodeSource, EpisodeWriter, ExportSink};
