//! Best-match selection over the reference index

use crate::config::MatchConfig;
use crate::features::FeatureSet;
use crate::index::ReferenceIndex;
use crate::similarity::SimilarityScorer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Score of one (query, reference) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub identity: String,
    /// Similarity in [0, 1]
    pub similarity: f64,
    /// Reference duration in seconds
    pub duration: f64,
    pub path: PathBuf,
}

/// How a query was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Best candidate cleared the threshold
    Matched,
    /// Candidates were scored but none cleared the threshold
    BelowThreshold,
    /// Nothing could be compared
    NoValidComparisons,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Matched => "matched",
            Self::BelowThreshold => "below threshold",
            Self::NoValidComparisons => "no valid comparisons",
        };
        write!(f, "{}", label)
    }
}

/// Result of matching one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub status: MatchStatus,
    /// Top candidate, only when it cleared the threshold
    pub best: Option<ComparisonResult>,
    /// Every successful comparison, best first
    pub ranked: Vec<ComparisonResult>,
    /// Untrimmed query duration in seconds
    pub query_duration: f64,
}

impl MatchOutcome {
    /// Build an outcome from unsorted results
    ///
    /// Sorting is stable, so equal similarities keep their input order. The
    /// threshold is inclusive.
    pub fn from_ranked(mut ranked: Vec<ComparisonResult>, threshold: f64, query_duration: f64) -> Self {
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        let (status, best) = match ranked.first() {
            None => (MatchStatus::NoValidComparisons, None),
            Some(top) if top.similarity >= threshold => (MatchStatus::Matched, Some(top.clone())),
            Some(_) => (MatchStatus::BelowThreshold, None),
        };

        Self {
            status,
            best,
            ranked,
            query_duration,
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Matched
    }

    /// Similarity of the accepted match, 0.0 otherwise
    pub fn best_similarity(&self) -> f64 {
        self.best.as_ref().map(|b| b.similarity).unwrap_or(0.0)
    }

    /// Top-ranked candidate whether or not it cleared the threshold
    pub fn closest(&self) -> Option<&ComparisonResult> {
        self.ranked.first()
    }
}

struct Candidate<'a> {
    identity: &'a str,
    features: &'a FeatureSet,
    duration: f64,
    path: &'a Path,
}

/// Ranks references against a query and applies the confidence threshold
#[derive(Debug, Clone, Copy)]
pub struct MatchSelector {
    scorer: SimilarityScorer,
    threshold: f64,
}

impl MatchSelector {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            scorer: SimilarityScorer::new(config),
            threshold: config.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `query` against every indexed reference
    pub fn select_best(&self, query: &FeatureSet, index: &ReferenceIndex, query_duration: f64) -> MatchOutcome {
        let entries = index.snapshot();
        let candidates: Vec<Candidate<'_>> = entries
            .iter()
            .map(|e| Candidate {
                identity: &e.identity,
                features: &e.features,
                duration: e.duration,
                path: &e.path,
            })
            .collect();

        self.rank(query, &candidates, query_duration)
    }

    /// Score `query` against `(identity, features, duration)` tuples
    pub fn select_best_features(
        &self,
        query: &FeatureSet,
        references: &[(&str, &FeatureSet, f64)],
        query_duration: f64,
    ) -> MatchOutcome {
        let candidates: Vec<Candidate<'_>> = references
            .iter()
            .map(|&(identity, features, duration)| Candidate {
                identity,
                features,
                duration,
                path: Path::new(""),
            })
            .collect();

        self.rank(query, &candidates, query_duration)
    }

    fn rank(&self, query: &FeatureSet, candidates: &[Candidate<'_>], query_duration: f64) -> MatchOutcome {
        if let Err(e) = query.validate() {
            log::warn!("Query cannot be compared: {}", e);
            return MatchOutcome::from_ranked(Vec::new(), self.threshold, query_duration);
        }

        // Indexed collect keeps candidate order for the stable sort
        let results: Vec<ComparisonResult> = candidates
            .par_iter()
            .filter_map(|candidate| {
                if let Err(e) = candidate.features.validate() {
                    log::debug!("Skipping reference {}: {}", candidate.identity, e);
                    return None;
                }
                Some(ComparisonResult {
                    identity: candidate.identity.to_string(),
                    similarity: self.scorer.score(query, candidate.features),
                    duration: candidate.duration,
                    path: candidate.path.to_path_buf(),
                })
            })
            .collect();

        let outcome = MatchOutcome::from_ranked(results, self.threshold, query_duration);
        match outcome.closest() {
            Some(top) => log::debug!(
                "Closest reference {} ({:.3}, {})",
                top.identity,
                top.similarity,
                outcome.status
            ),
            None => log::debug!("No valid comparisons"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn timbre_only(a: f32, b: f32) -> FeatureSet {
        FeatureSet::new(
            None,
            Some(Array2::from_shape_fn((2, 10), |(k, _)| if k == 0 { a } else { b })),
        )
    }

    fn result(identity: &str, similarity: f64) -> ComparisonResult {
        ComparisonResult {
            identity: identity.into(),
            similarity,
            duration: 30.0,
            path: PathBuf::from(format!("/o/{}", identity)),
        }
    }

    #[test]
    fn test_ranking_order() {
        let index = ReferenceIndex::new();
        index.add("far.wav", timbre_only(0.0, 1.0), 1.0, "/o/far.wav");
        index.add("near.wav", timbre_only(1.0, 0.1), 1.0, "/o/near.wav");
        index.add("mid.wav", timbre_only(1.0, 1.0), 1.0, "/o/mid.wav");
        index.add("close.wav", timbre_only(1.0, 0.5), 1.0, "/o/close.wav");

        let selector = MatchSelector::new(&MatchConfig::default());
        let outcome = selector.select_best(&timbre_only(1.0, 0.0), &index, 42.0);

        let order: Vec<&str> = outcome.ranked.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(order, vec!["near.wav", "close.wav", "mid.wav", "far.wav"]);
        assert!(outcome.is_match());
        assert_eq!(outcome.best.as_ref().unwrap().identity, "near.wav");
        assert_eq!(outcome.query_duration, 42.0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = ReferenceIndex::new();
        for name in ["b.wav", "a.wav", "c.wav"] {
            index.add(name, timbre_only(1.0, 1.0), 1.0, format!("/o/{}", name));
        }

        let selector = MatchSelector::new(&MatchConfig::default());
        let outcome = selector.select_best(&timbre_only(1.0, 0.0), &index, 1.0);
        let order: Vec<&str> = outcome.ranked.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(order, vec!["b.wav", "a.wav", "c.wav"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let threshold = 0.35;
        let eps = 1e-9;

        let at = MatchOutcome::from_ranked(vec![result("a", threshold)], threshold, 1.0);
        assert_eq!(at.status, MatchStatus::Matched);

        let above = MatchOutcome::from_ranked(vec![result("a", threshold + eps)], threshold, 1.0);
        assert_eq!(above.status, MatchStatus::Matched);

        let below = MatchOutcome::from_ranked(vec![result("a", threshold - eps)], threshold, 1.0);
        assert_eq!(below.status, MatchStatus::BelowThreshold);
        assert!(below.best.is_none());
        assert_eq!(below.ranked.len(), 1);
        assert_eq!(below.best_similarity(), 0.0);
        assert_eq!(below.closest().unwrap().identity, "a");
    }

    #[test]
    fn test_empty_index_is_no_valid_comparisons() {
        let selector = MatchSelector::new(&MatchConfig::default());
        let outcome = selector.select_best(&timbre_only(1.0, 0.0), &ReferenceIndex::new(), 5.0);

        assert_eq!(outcome.status, MatchStatus::NoValidComparisons);
        assert!(outcome.ranked.is_empty());
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_invalid_references_are_dropped() {
        let index = ReferenceIndex::new();
        index.add("empty.wav", FeatureSet::default(), 1.0, "/o/empty.wav");

        let selector = MatchSelector::new(&MatchConfig::default());
        let outcome = selector.select_best(&timbre_only(1.0, 0.0), &index, 1.0);
        assert_eq!(outcome.status, MatchStatus::NoValidComparisons);

        index.add("ok.wav", timbre_only(1.0, 0.0), 1.0, "/o/ok.wav");
        let outcome = selector.select_best(&timbre_only(1.0, 0.0), &index, 1.0);
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.status, MatchStatus::Matched);
    }

    #[test]
    fn test_select_best_features_tuples() {
        let selector = MatchSelector::new(&MatchConfig::strict());
        let near = timbre_only(1.0, 0.05);
        let far = timbre_only(0.0, 1.0);

        let outcome = selector.select_best_features(
            &timbre_only(1.0, 0.0),
            &[("far", &far, 10.0), ("near", &near, 20.0)],
            15.0,
        );
        let best = outcome.best.unwrap();
        assert_eq!(best.identity, "near");
        assert_eq!(best.duration, 20.0);
        assert_eq!(best.path, PathBuf::new());
    }
}
