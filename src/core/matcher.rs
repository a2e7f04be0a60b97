use crate::common::config::RecognitionConfig;
use crate::core::recognizer::euclidean_distance;
use crate::storage::embedding_store::{EmbeddingIndex, IdentityKey};

const RANKING_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCandidate {
    pub identity: IdentityKey,
    /// Mean distance from the query to every embedding of this identity.
    pub mean_distance: f32,
    /// Distance to the single closest embedding of this identity.
    pub nearest_distance: f32,
    pub sample_count: usize,
    /// `1 - mean_distance`, floored at 0.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    /// Best and runner-up are well separated.
    Relaxed,
    /// Best and runner-up are close.
    Strict,
    /// Only one identity is enrolled.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub candidate: RecognitionCandidate,
    pub mode: ThresholdMode,
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Match),
    /// There was a best candidate but it did not clear the adaptive threshold.
    BelowThreshold(Match),
    /// The store has identities but none were comparable with the query.
    NoCandidates,
    EmptyStore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub outcome: MatchOutcome,
    /// Top candidates by ascending mean distance; empty unless requested.
    pub ranking: Vec<RecognitionCandidate>,
}

impl Recognition {
    pub fn matched(&self) -> Option<&RecognitionCandidate> {
        match &self.outcome {
            MatchOutcome::Matched(m) => Some(&m.candidate),
            _ => None,
        }
    }
}

/// Ranks enrolled identities against a query embedding.
///
/// Holds no store state: callers pass the index snapshot they want matched
/// against, so ranking does no I/O and never waits on a writer.
pub struct RecognitionEngine {
    config: RecognitionConfig,
}

impl RecognitionEngine {
    pub fn new(config: &RecognitionConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn recognize(&self, index: &EmbeddingIndex, query: &[f32], include_ranking: bool) -> Recognition {
        if index.is_empty() {
            return Recognition {
                outcome: MatchOutcome::EmptyStore,
                ranking: Vec::new(),
            };
        }

        let candidates = self.rank(index, query);
        let Some(best) = candidates.first() else {
            tracing::debug!("No comparable embeddings for a {}-d query", query.len());
            return Recognition {
                outcome: MatchOutcome::NoCandidates,
                ranking: Vec::new(),
            };
        };

        let (mode, threshold) = self.select_threshold(&candidates);
        let found = Match {
            candidate: best.clone(),
            mode,
            threshold,
        };

        let outcome = if best.mean_distance < threshold {
            MatchOutcome::Matched(found)
        } else {
            MatchOutcome::BelowThreshold(found)
        };

        let ranking = if include_ranking {
            candidates.into_iter().take(RANKING_LEN).collect()
        } else {
            Vec::new()
        };

        Recognition { outcome, ranking }
    }

    /// All identities with at least one embedding of the query's width,
    /// sorted by ascending mean distance.
    pub fn rank(&self, index: &EmbeddingIndex, query: &[f32]) -> Vec<RecognitionCandidate> {
        if query.is_empty() || query.iter().any(|v| !v.is_finite()) {
            return Vec::new();
        }

        let mut candidates: Vec<RecognitionCandidate> = index
            .iter()
            .filter_map(|(identity, embeddings)| {
                let mut total = 0.0f32;
                let mut nearest = f32::INFINITY;
                let mut count = 0usize;

                for embedding in embeddings.iter().filter(|e| e.len() == query.len()) {
                    let d = euclidean_distance(query, embedding);
                    total += d;
                    nearest = nearest.min(d);
                    count += 1;
                }

                if count == 0 {
                    return None;
                }

                let mean_distance = total / count as f32;
                Some(RecognitionCandidate {
                    identity: identity.clone(),
                    mean_distance,
                    nearest_distance: nearest,
                    sample_count: count,
                    confidence: (1.0 - mean_distance).max(0.0),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.mean_distance
                .total_cmp(&b.mean_distance)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        candidates
    }

    /// Picks the acceptance threshold for an already sorted ranking.
    pub fn select_threshold(&self, ranked: &[RecognitionCandidate]) -> (ThresholdMode, f32) {
        match ranked {
            [best, second, ..] => {
                if second.mean_distance - best.mean_distance > self.config.margin {
                    (ThresholdMode::Relaxed, self.config.relaxed_threshold)
                } else {
                    (ThresholdMode::Strict, self.config.strict_threshold)
                }
            }
            _ => (ThresholdMode::Default, self.config.default_threshold),
        }
    }
}
