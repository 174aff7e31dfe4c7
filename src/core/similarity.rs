use crate::common::config::SimilarityConfig;
use crate::common::error::{FaceProofError, Result};
use crate::core::face::Embedding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Lower is better; a threshold is the largest accepted distance.
    #[default]
    Euclidean,
    /// Higher is better; a threshold is the smallest accepted similarity.
    Cosine,
}

impl Metric {
    pub fn accepts(self, score: f32, threshold: f32) -> bool {
        match self {
            Metric::Euclidean => score <= threshold,
            Metric::Cosine => score >= threshold,
        }
    }

    pub fn is_better(self, candidate: f32, current: f32) -> bool {
        match self {
            Metric::Euclidean => candidate < current,
            Metric::Cosine => candidate > current,
        }
    }

    /// True when `lenient` accepts everything `strict` accepts.
    pub fn at_least_as_lenient(self, lenient: f32, strict: f32) -> bool {
        match self {
            Metric::Euclidean => lenient >= strict,
            Metric::Cosine => lenient <= strict,
        }
    }

    /// Maps a raw score onto a higher-is-better similarity used for trend analysis.
    pub fn to_similarity(self, score: f32) -> f32 {
        match self {
            Metric::Euclidean => (1.0 - score).max(0.0),
            Metric::Cosine => score,
        }
    }
}

/// Accept thresholds in the units of the active [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub adequate_lighting: f32,
    pub poor_lighting: f32,
    /// Used whenever the stored and live embeddings differ in length.
    pub length_mismatch: f32,
}

impl MatchThresholds {
    pub fn validate(&self, metric: Metric, section: &str) -> Result<()> {
        let values = [self.adequate_lighting, self.poor_lighting, self.length_mismatch];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FaceProofError::Config(format!("{} thresholds must be finite", section)));
        }
        if !metric.at_least_as_lenient(self.poor_lighting, self.adequate_lighting)
            || !metric.at_least_as_lenient(self.length_mismatch, self.poor_lighting)
        {
            return Err(FaceProofError::Config(format!(
                "{} thresholds must grow more lenient from adequate lighting to poor lighting to length mismatch",
                section
            )));
        }
        Ok(())
    }
}

/// Reference embeddings a live embedding is compared against.
#[derive(Debug, Clone, Copy)]
pub enum References<'a> {
    Single(&'a [f32]),
    Multiple(&'a [Embedding]),
}

impl<'a> From<&'a [f32]> for References<'a> {
    fn from(value: &'a [f32]) -> Self {
        References::Single(value)
    }
}

impl<'a> From<&'a [Embedding]> for References<'a> {
    fn from(value: &'a [Embedding]) -> Self {
        References::Multiple(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Raw metric value (distance or cosine similarity).
    pub score: f32,
    pub similarity: f32,
    pub threshold: f32,
    pub matched: bool,
    pub length_mismatch: bool,
    pub reference_index: usize,
}

/// Euclidean distance. Vectors of different length are compared on their common prefix.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(
            "Embedding length mismatch ({} vs {}), comparing first {} values",
            a.len(), b.len(), a.len().min(b.len())
        );
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(FaceProofError::LengthMismatch { left: a.len(), right: b.len() });
    }
    Ok(cosine_unchecked(a, b))
}

fn cosine_unchecked(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Threshold-relative matching. Thresholds depend on lighting and on whether
/// the compared embeddings came from the same scheme (equal length).
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    metric: Metric,
    thresholds: MatchThresholds,
}

impl SimilarityEngine {
    pub fn new(metric: Metric, thresholds: MatchThresholds) -> Self {
        Self { metric, thresholds }
    }

    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self::new(config.metric, config.thresholds)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self, lighting_adequate: bool, lengths_match: bool) -> f32 {
        if !lengths_match {
            self.thresholds.length_mismatch
        } else if lighting_adequate {
            self.thresholds.adequate_lighting
        } else {
            self.thresholds.poor_lighting
        }
    }

    /// Raw metric value over the common prefix of both vectors.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::Cosine => {
                let n = a.len().min(b.len());
                if a.len() != b.len() {
                    tracing::warn!("Embedding length mismatch ({} vs {}), comparing first {} values", a.len(), b.len(), n);
                }
                cosine_unchecked(&a[..n], &b[..n])
            }
        }
    }

    pub fn compare(&self, current: &[f32], stored: &[f32], lighting_adequate: bool) -> MatchOutcome {
        let length_mismatch = current.len() != stored.len();
        let score = self.score(current, stored);
        let threshold = self.threshold(lighting_adequate, !length_mismatch);
        let matched = self.metric.accepts(score, threshold);

        tracing::debug!(
            "Similarity check: score={:.4} threshold={:.4} matched={} mismatch={}",
            score, threshold, matched, length_mismatch
        );

        MatchOutcome {
            score,
            similarity: self.metric.to_similarity(score),
            threshold,
            matched,
            length_mismatch,
            reference_index: 0,
        }
    }

    /// Best-of-N comparison. Matching outcomes win over non-matching ones, then
    /// the best raw score wins. `None` only when there are no references.
    pub fn best_match<'a>(
        &self,
        current: &[f32],
        stored: impl Into<References<'a>>,
        lighting_adequate: bool,
    ) -> Option<MatchOutcome> {
        match stored.into() {
            References::Single(reference) => Some(self.compare(current, reference, lighting_adequate)),
            References::Multiple(references) => {
                let mut best: Option<MatchOutcome> = None;
                for (index, reference) in references.iter().enumerate() {
                    let mut outcome = self.compare(current, reference, lighting_adequate);
                    outcome.reference_index = index;

                    best = match best {
                        None => Some(outcome),
                        Some(prev) if outcome.matched && !prev.matched => Some(outcome),
                        Some(prev) if outcome.matched == prev.matched
                            && self.metric.is_better(outcome.score, prev.score) => Some(outcome),
                        keep => keep,
                    };
                }
                best
            }
        }
    }

    pub fn is_match<'a>(&self, current: &[f32], stored: impl Into<References<'a>>, lighting_adequate: bool) -> bool {
        self.best_match(current, stored, lighting_adequate)
            .map(|outcome| outcome.matched)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(metric: Metric) -> SimilarityEngine {
        match metric {
            Metric::Euclidean => SimilarityEngine::new(
                metric,
                MatchThresholds { adequate_lighting: 0.5, poor_lighting: 0.6, length_mismatch: 0.75 },
            ),
            Metric::Cosine => SimilarityEngine::new(
                metric,
                MatchThresholds { adequate_lighting: 0.8, poor_lighting: 0.7, length_mismatch: 0.6 },
            ),
        }
    }

    #[test]
    fn self_comparison_identities() {
        let a = vec![0.3, -1.2, 4.0, 0.01];
        assert_eq!(euclidean_distance(&a, &a), 0.0);
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_length_mismatch() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, FaceProofError::LengthMismatch { left: 2, right: 1 }));
    }

    #[test]
    fn distance_truncates_to_common_prefix() {
        let a = [1.0, 1.0, 100.0];
        let b = [1.0, 1.0];
        assert_eq!(euclidean_distance(&a, &b), 0.0);
    }

    #[test]
    fn mismatch_uses_lenient_threshold() {
        let e = engine(Metric::Euclidean);
        // prefix distance 0.7: rejected at 0.5/0.6, accepted at the 0.75 fallback
        let stored = [0.0, 0.0];
        let current_same = [0.7, 0.0];
        let current_longer = [0.7, 0.0, 9.0];

        assert!(!e.is_match(&current_same, &stored[..], true));
        assert!(!e.is_match(&current_same, &stored[..], false));

        let outcome = e.best_match(&current_longer, &stored[..], true).unwrap();
        assert!(outcome.length_mismatch);
        assert_eq!(outcome.threshold, 0.75);
        assert!(outcome.matched);
    }

    #[test]
    fn poor_lighting_relaxes_threshold() {
        let e = engine(Metric::Euclidean);
        let stored = [0.0, 0.0];
        let current = [0.55, 0.0];
        assert!(!e.is_match(&current, &stored[..], true));
        assert!(e.is_match(&current, &stored[..], false));
    }

    #[test]
    fn best_of_n_equals_any_single_match() {
        let e = engine(Metric::Euclidean);
        let current = vec![0.0, 0.0, 0.0];
        let cases: Vec<Vec<Embedding>> = vec![
            vec![vec![2.0, 0.0, 0.0], vec![0.1, 0.0, 0.0]],
            vec![vec![2.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]],
            vec![vec![2.0, 0.0], vec![0.7, 0.0]],
            vec![vec![0.7, 0.0, 0.0], vec![0.7, 0.0]],
        ];
        for stored in cases {
            for lighting in [true, false] {
                let any = stored.iter().any(|s| e.is_match(&current, &s[..], lighting));
                assert_eq!(e.is_match(&current, &stored[..], lighting), any, "{:?}", stored);
            }
        }
    }

    #[test]
    fn best_match_reports_closest_reference() {
        let e = engine(Metric::Cosine);
        let current = vec![1.0, 0.0];
        let stored = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![1.0, 0.5]];
        let outcome = e.best_match(&current, &stored[..], true).unwrap();
        assert_eq!(outcome.reference_index, 1);
        assert!(outcome.matched);
    }

    #[test]
    fn empty_reference_list_never_matches() {
        let e = engine(Metric::Cosine);
        let stored: Vec<Embedding> = vec![];
        assert!(e.best_match(&[1.0], &stored[..], true).is_none());
        assert!(!e.is_match(&[1.0], &stored[..], true));
    }

    #[test]
    fn threshold_validation_requires_lenient_ordering() {
        let ok = MatchThresholds { adequate_lighting: 0.5, poor_lighting: 0.6, length_mismatch: 0.75 };
        assert!(ok.validate(Metric::Euclidean, "t").is_ok());
        assert!(ok.validate(Metric::Cosine, "t").is_err());
    }
}
