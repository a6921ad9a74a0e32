//! Domain logic for robot-episode quality analysis and non-destructive editing.
//!
//! Nothing in this crate performs I/O or logs. Storage, progress reporting
//! and export orchestration live in the sibling crates.
//!
//! Entry points:
//!
//! - [`quality::analyze_trajectory`]: smoothness, efficiency and jitter scoring.
//! - [`anomaly::detect_anomalies`]: statistical spike and stall detection.
//! - [`consensus::compute_consensus`]: multi-annotator aggregation.
//! - [`edit::EditModel`] + [`plan::build_frame_plan`]: the edit overlay and
//!   the ordered frame list an export materializes.

pub mod annotation;
pub mod anomaly;
pub mod consensus;
pub mod edit;
pub mod error;
pub mod export;
pub mod frame;
pub mod kinematics;
pub mod plan;
pub mod quality;
pub mod spectrum;
pub mod trajectory;
pub mod types;

pub use error::CoreError;
