//! Batch runner over a local dataset: suggested annotations, then export.

pub mod analysis;
pub mod config;
pub mod export;
