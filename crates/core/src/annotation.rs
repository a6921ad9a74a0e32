//! Per-annotator episode annotations and the per-episode annotation file.
//!
//! An [`EpisodeAnnotationFile`] holds at most one [`EpisodeAnnotation`] per
//! annotator. Entries are keyed by annotator id internally and exposed as an
//! ordered list at the serialization boundary; saving again for the same
//! annotator replaces that entry in place. Consensus is recomputed after
//! every mutation.

use std::collections::BTreeSet;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::anomaly::{validate_anomaly, Anomaly};
use crate::consensus::{compute_consensus, Consensus};
use crate::error::CoreError;
use crate::quality::{QualityFlag, TrajectoryMetrics};
use crate::types::{EpisodeIndex, FrameIndex, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reserved annotator id for analyzer/detector suggestions.
pub const SUGGESTION_ANNOTATOR_ID: &str = "auto-suggest";

/// Maximum length of an annotator id.
pub const MAX_ANNOTATOR_ID_LEN: usize = 128;

/// Valid range for 1-5 ratings.
const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Suggested task rating thresholds on the overall trajectory score.
const SUGGEST_SUCCESS_MIN_SCORE: u8 = 4;
const SUGGEST_PARTIAL_MIN_SCORE: u8 = 2;

// ---------------------------------------------------------------------------
// Annotation parts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionRating {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletenessAnnotation {
    pub rating: CompletionRating,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl TaskCompletenessAnnotation {
    pub fn new(rating: CompletionRating) -> Self {
        Self {
            rating,
            failure_reason: None,
            notes: String::new(),
        }
    }
}

/// Trajectory judgment. Metric fields are usually seeded from the analyzer
/// and may be overridden by the annotator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryQualityAnnotation {
    pub overall_score: u8,
    #[serde(default)]
    pub smoothness: Option<f64>,
    #[serde(default)]
    pub efficiency: Option<f64>,
    #[serde(default)]
    pub jitter: Option<f64>,
    #[serde(default)]
    pub hesitation_count: Option<u32>,
    #[serde(default)]
    pub correction_count: Option<u32>,
    #[serde(default)]
    pub flags: BTreeSet<QualityFlag>,
    #[serde(default)]
    pub notes: String,
}

impl TrajectoryQualityAnnotation {
    /// A bare score with no metric detail.
    pub fn with_score(overall_score: u8) -> Self {
        Self {
            overall_score,
            smoothness: None,
            efficiency: None,
            jitter: None,
            hesitation_count: None,
            correction_count: None,
            flags: BTreeSet::new(),
            notes: String::new(),
        }
    }

    /// Seed every field from analyzer output.
    pub fn from_metrics(metrics: &TrajectoryMetrics) -> Self {
        Self {
            overall_score: metrics.overall_score,
            smoothness: Some(metrics.smoothness),
            efficiency: Some(metrics.efficiency),
            jitter: Some(metrics.jitter),
            hesitation_count: Some(metrics.hesitation_count),
            correction_count: Some(metrics.correction_count),
            flags: metrics.flags.clone(),
            notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityAnnotation {
    /// 1-5 video quality rating.
    pub video_quality: u8,
    #[serde(default)]
    pub sync_issues: bool,
    #[serde(default)]
    pub missing_frames: Vec<FrameIndex>,
    #[serde(default)]
    pub notes: String,
}

impl Default for DataQualityAnnotation {
    fn default() -> Self {
        Self {
            video_quality: 5,
            sync_issues: false,
            missing_frames: Vec::new(),
            notes: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// EpisodeAnnotation
// ---------------------------------------------------------------------------

/// One annotator's complete judgment of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeAnnotation {
    pub annotator_id: String,
    pub task_completeness: TaskCompletenessAnnotation,
    pub trajectory_quality: TrajectoryQualityAnnotation,
    pub data_quality: DataQualityAnnotation,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl EpisodeAnnotation {
    pub fn new(
        annotator_id: impl Into<String>,
        task_completeness: TaskCompletenessAnnotation,
        trajectory_quality: TrajectoryQualityAnnotation,
        data_quality: DataQualityAnnotation,
    ) -> Self {
        let now = Utc::now();
        Self {
            annotator_id: annotator_id.into(),
            task_completeness,
            trajectory_quality,
            data_quality,
            anomalies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The analyzer/detector output expressed as one more annotation source.
    ///
    /// The task rating is suggested from the overall score: 4-5 success,
    /// 2-3 partial, 1 failure.
    pub fn suggestion(metrics: &TrajectoryMetrics, anomalies: Vec<Anomaly>) -> Self {
        let rating = if metrics.overall_score >= SUGGEST_SUCCESS_MIN_SCORE {
            CompletionRating::Success
        } else if metrics.overall_score >= SUGGEST_PARTIAL_MIN_SCORE {
            CompletionRating::Partial
        } else {
            CompletionRating::Failure
        };

        let mut annotation = Self::new(
            SUGGESTION_ANNOTATOR_ID,
            TaskCompletenessAnnotation::new(rating),
            TrajectoryQualityAnnotation::from_metrics(metrics),
            DataQualityAnnotation::default(),
        );
        annotation.anomalies = anomalies;
        annotation
    }

    pub fn is_suggestion(&self) -> bool {
        self.annotator_id == SUGGESTION_ANNOTATOR_ID
    }
}

/// Validate an annotation before it is stored.
pub fn validate_annotation(annotation: &EpisodeAnnotation) -> Result<(), CoreError> {
    let id = annotation.annotator_id.trim();
    if id.is_empty() {
        return Err(CoreError::Validation(
            "annotator_id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ANNOTATOR_ID_LEN {
        return Err(CoreError::Validation(format!(
            "annotator_id must not exceed {MAX_ANNOTATOR_ID_LEN} characters"
        )));
    }

    let score = annotation.trajectory_quality.overall_score;
    if !RATING_RANGE.contains(&score) {
        return Err(CoreError::Validation(format!(
            "overall_score must be between 1 and 5, got {score}"
        )));
    }
    let video = annotation.data_quality.video_quality;
    if !RATING_RANGE.contains(&video) {
        return Err(CoreError::Validation(format!(
            "video_quality must be between 1 and 5, got {video}"
        )));
    }

    for anomaly in &annotation.anomalies {
        validate_anomaly(anomaly)?;
    }
    Ok(())
}

fn normalize_annotator_id(annotation: &mut EpisodeAnnotation) {
    let trimmed = annotation.annotator_id.trim();
    if trimmed.len() != annotation.annotator_id.len() {
        annotation.annotator_id = trimmed.to_string();
    }
}

// ---------------------------------------------------------------------------
// EpisodeAnnotationFile
// ---------------------------------------------------------------------------

/// All annotations of one episode plus their consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AnnotationFileRepr", into = "AnnotationFileRepr")]
pub struct EpisodeAnnotationFile {
    dataset: String,
    episode_index: EpisodeIndex,
    annotations: IndexMap<String, EpisodeAnnotation>,
    consensus: Option<Consensus>,
}

/// Wire shape: annotations as an ordered list.
#[derive(Clone, Serialize, Deserialize)]
struct AnnotationFileRepr {
    dataset: String,
    episode_index: EpisodeIndex,
    #[serde(default)]
    annotations: Vec<EpisodeAnnotation>,
    #[serde(default)]
    consensus: Option<Consensus>,
}

impl From<AnnotationFileRepr> for EpisodeAnnotationFile {
    fn from(repr: AnnotationFileRepr) -> Self {
        let mut file = Self::new(repr.dataset, repr.episode_index);
        for mut annotation in repr.annotations {
            normalize_annotator_id(&mut annotation);
            file.annotations
                .insert(annotation.annotator_id.clone(), annotation);
        }
        // The stored consensus is derived data; never trust it over the entries.
        file.recompute();
        file
    }
}

impl From<EpisodeAnnotationFile> for AnnotationFileRepr {
    fn from(file: EpisodeAnnotationFile) -> Self {
        Self {
            dataset: file.dataset,
            episode_index: file.episode_index,
            annotations: file.annotations.into_values().collect(),
            consensus: file.consensus,
        }
    }
}

impl EpisodeAnnotationFile {
    pub fn new(dataset: impl Into<String>, episode_index: EpisodeIndex) -> Self {
        Self {
            dataset: dataset.into(),
            episode_index,
            annotations: IndexMap::new(),
            consensus: None,
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn episode_index(&self) -> EpisodeIndex {
        self.episode_index
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Annotations in the order annotators first saved them.
    pub fn annotations(&self) -> impl Iterator<Item = &EpisodeAnnotation> {
        self.annotations.values()
    }

    pub fn get(&self, annotator_id: &str) -> Option<&EpisodeAnnotation> {
        self.annotations.get(annotator_id.trim())
    }

    /// Present only when at least two annotators have saved.
    pub fn consensus(&self) -> Option<&Consensus> {
        self.consensus.as_ref()
    }

    /// Add or replace the entry for `annotation.annotator_id`.
    ///
    /// The id is stored trimmed, so `" alice"` and `"alice"` share one entry.
    /// A replacement keeps the original position and `created_at`.
    pub fn upsert(&mut self, mut annotation: EpisodeAnnotation) -> Result<(), CoreError> {
        normalize_annotator_id(&mut annotation);
        validate_annotation(&annotation)?;

        match self.annotations.get_mut(&annotation.annotator_id) {
            Some(existing) => {
                annotation.created_at = existing.created_at;
                annotation.updated_at = Utc::now().max(existing.created_at);
                *existing = annotation;
            }
            None => {
                self.annotations
                    .insert(annotation.annotator_id.clone(), annotation);
            }
        }

        self.recompute();
        Ok(())
    }

    /// Remove one annotator's entry, preserving the order of the rest.
    pub fn remove(&mut self, annotator_id: &str) -> Option<EpisodeAnnotation> {
        let removed = self.annotations.shift_remove(annotator_id.trim());
        if removed.is_some() {
            self.recompute();
        }
        removed
    }

    /// Mark an anomaly recorded by `annotator_id` as verified.
    pub fn verify_anomaly(&mut self, annotator_id: &str, anomaly_id: &str) -> Result<(), CoreError> {
        let annotation = self
            .annotations
            .get_mut(annotator_id.trim())
            .ok_or_else(|| CoreError::NotFound {
                entity: "annotation",
                id: annotator_id.to_string(),
            })?;
        let anomaly = annotation
            .anomalies
            .iter_mut()
            .find(|a| a.id == anomaly_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "anomaly",
                id: anomaly_id.to_string(),
            })?;

        anomaly.verify();
        annotation.updated_at = Utc::now();
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.consensus = compute_consensus(self.annotations.values());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
