//! Multi-annotator consensus.
//!
//! Consensus only exists once at least two annotators have judged an
//! episode; for zero or one annotation it is `None`, never a zeroed record.
//! It is always recomputed from scratch, never patched incrementally.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::annotation::{CompletionRating, EpisodeAnnotation};

/// Minimum number of annotations before consensus is computed.
pub const MIN_ANNOTATIONS_FOR_CONSENSUS: usize = 2;

/// Aggregated judgment over all annotators of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    /// Most frequent task-completeness rating; ties go to the rating seen first.
    pub task_completeness: CompletionRating,
    /// Mean of the annotators' overall scores, rounded to one decimal.
    pub trajectory_quality: f64,
    /// Fraction of annotators whose rating matches `task_completeness`.
    pub agreement_score: f64,
    pub annotator_count: usize,
    /// Distinct anomalies (by id) that any annotator has verified.
    pub verified_anomaly_count: usize,
}

/// Compute consensus over annotations in their recorded order.
pub fn compute_consensus<'a, I>(annotations: I) -> Option<Consensus>
where
    I: IntoIterator<Item = &'a EpisodeAnnotation>,
{
    let annotations: Vec<&EpisodeAnnotation> = annotations.into_iter().collect();
    let total = annotations.len();
    if total < MIN_ANNOTATIONS_FOR_CONSENSUS {
        return None;
    }

    let ratings: Vec<CompletionRating> = annotations
        .iter()
        .map(|a| a.task_completeness.rating)
        .collect();
    let task_completeness = modal_rating(&ratings)?;
    let matching = ratings.iter().filter(|r| **r == task_completeness).count();

    let score_sum: f64 = annotations
        .iter()
        .map(|a| a.trajectory_quality.overall_score as f64)
        .sum();
    let trajectory_quality = round_one_decimal(score_sum / total as f64);

    let verified: HashSet<&str> = annotations
        .iter()
        .flat_map(|a| a.anomalies.iter())
        .filter(|an| an.verified)
        .map(|an| an.id.as_str())
        .collect();

    Some(Consensus {
        task_completeness,
        trajectory_quality,
        agreement_score: matching as f64 / total as f64,
        annotator_count: total,
        verified_anomaly_count: verified.len(),
    })
}

/// Most frequent rating; on ties the earliest-encountered rating wins.
fn modal_rating(ratings: &[CompletionRating]) -> Option<CompletionRating> {
    let mut tally: Vec<(CompletionRating, usize)> = Vec::new();
    for &r in ratings {
        match tally.iter_mut().find(|(seen, _)| *seen == r) {
            Some((_, count)) => *count += 1,
            None => tally.push((r, 1)),
        }
    }

    let mut best: Option<(CompletionRating, usize)> = None;
    for (r, count) in tally {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((r, count));
        }
    }
    best.map(|(r, _)| r)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::tests::annotation;
    use crate::anomaly::{Anomaly, AnomalyType, Severity};

    #[test]
    fn absent_for_zero_or_one() {
        assert_eq!(compute_consensus(&Vec::<EpisodeAnnotation>::new()), None);
        assert_eq!(compute_consensus(&[annotation("a", CompletionRating::Success, 4)]), None);
    }

    #[test]
    fn identical_pair_agrees_fully() {
        let anns = [
            annotation("a", CompletionRating::Success, 4),
            annotation("b", CompletionRating::Success, 4),
        ];
        let c = compute_consensus(&anns).unwrap();
        assert_eq!(c.task_completeness, CompletionRating::Success);
        assert_eq!(c.agreement_score, 1.0);
        assert_eq!(c.trajectory_quality, 4.0);
        assert_eq!(c.annotator_count, 2);
    }

    #[test]
    fn majority_rating_wins() {
        let anns = [
            annotation("a", CompletionRating::Failure, 1),
            annotation("b", CompletionRating::Success, 5),
            annotation("c", CompletionRating::Success, 4),
        ];
        let c = compute_consensus(&anns).unwrap();
        assert_eq!(c.task_completeness, CompletionRating::Success);
        assert!((c.agreement_score - 2.0 / 3.0).abs() < 1e-12);
        // (1 + 5 + 4) / 3 = 3.333.. -> 3.3
        assert_eq!(c.trajectory_quality, 3.3);
    }

    #[test]
    fn ties_go_to_first_encountered() {
        let anns = [
            annotation("a", CompletionRating::Partial, 3),
            annotation("b", CompletionRating::Success, 4),
            annotation("c", CompletionRating::Success, 4),
            annotation("d", CompletionRating::Partial, 3),
        ];
        let c = compute_consensus(&anns).unwrap();
        assert_eq!(c.task_completeness, CompletionRating::Partial);
        assert_eq!(c.agreement_score, 0.5);
        assert_eq!(c.trajectory_quality, 3.5);
    }

    #[test]
    fn verified_anomalies_counted_once() {
        let mut shared =
            Anomaly::manual(AnomalyType::Collision, Severity::High, (1, 2), (0.1, 0.2), "hit").unwrap();
        shared.verify();
        let unverified =
            Anomaly::manual(AnomalyType::Other, Severity::Low, (3, 3), (0.3, 0.3), "?").unwrap();

        let mut a = annotation("a", CompletionRating::Success, 4);
        a.anomalies = vec![shared.clone(), unverified];
        let mut b = annotation("b", CompletionRating::Success, 4);
        b.anomalies = vec![shared];

        let c = compute_consensus(&[a, b]).unwrap();
        assert_eq!(c.verified_anomaly_count, 1);
    }
}
