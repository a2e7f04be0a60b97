use crate::common::config::ValidationConfig;
use crate::core::recognizer::{Embedding, euclidean_distance};

/// Advisory consistency check of one identity's freshly extracted embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// `1 - average_distance`, clamped to `[0, 1]`.
    pub consistency: f32,
    pub average_distance: f32,
    pub sample_count: usize,
    pub is_valid: bool,
}

pub struct TrainingValidator {
    config: ValidationConfig,
}

impl TrainingValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Average pairwise distance over at most `sample_cap` embeddings.
    ///
    /// Sampling is a deterministic stride over the input so repeated
    /// validation of the same set reports the same numbers.
    pub fn validate(&self, embeddings: &[Embedding]) -> TrainingReport {
        match embeddings.len() {
            0 => {
                return TrainingReport {
                    consistency: 0.0,
                    average_distance: 0.0,
                    sample_count: 0,
                    is_valid: false,
                }
            }
            1 => {
                return TrainingReport {
                    consistency: 1.0,
                    average_distance: 0.0,
                    sample_count: 1,
                    is_valid: true,
                }
            }
            _ => {}
        }

        let sample = stride_sample(embeddings, self.config.sample_cap);

        let mut total = 0.0f64;
        let mut pairs = 0usize;
        for i in 0..sample.len() {
            for j in (i + 1)..sample.len() {
                total += euclidean_distance(sample[i], sample[j]) as f64;
                pairs += 1;
            }
        }

        let average_distance = (total / pairs as f64) as f32;
        TrainingReport {
            consistency: (1.0 - average_distance).clamp(0.0, 1.0),
            average_distance,
            sample_count: sample.len(),
            is_valid: average_distance < self.config.acceptable_distance,
        }
    }
}

fn stride_sample(embeddings: &[Embedding], cap: usize) -> Vec<&Embedding> {
    let cap = cap.max(2);
    if embeddings.len() <= cap {
        return embeddings.iter().collect();
    }
    (0..cap).map(|k| &embeddings[k * embeddings.len() / cap]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TrainingValidator {
        TrainingValidator::new(&ValidationConfig::default())
    }

    #[test]
    fn empty_set_is_invalid() {
        let report = validator().validate(&[]);
        assert!(!report.is_valid);
        assert_eq!(report.sample_count, 0);
    }

    #[test]
    fn single_embedding_is_trivially_consistent() {
        let report = validator().validate(&[vec![1.0, 0.0]]);
        assert!(report.is_valid);
        assert_eq!(report.consistency, 1.0);
    }

    #[test]
    fn tight_cluster_is_valid() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.99, 0.1], vec![0.98, 0.15]];
        let report = validator().validate(&embeddings);
        assert!(report.is_valid);
        assert!(report.average_distance < 0.2);
        assert!(report.consistency > 0.8);
    }

    #[test]
    fn scattered_set_is_flagged() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let report = validator().validate(&embeddings);
        assert!(!report.is_valid);
        assert_eq!(report.consistency, 0.0);
    }

    #[test]
    fn sampling_is_capped() {
        let embeddings: Vec<Embedding> = (0..500).map(|i| vec![i as f32 / 500.0, 0.0]).collect();
        let report = validator().validate(&embeddings);
        assert_eq!(report.sample_count, 50);
    }
}
