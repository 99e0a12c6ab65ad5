use crate::embed::{normalize_embedding, Embedding};
use crate::registry::ReferenceRegistry;

/// Label for a face that matched nobody.
///
/// This is both the matcher's "no match" answer and a real key in the
/// cooldown table, so intruder alerts share one rate limit. A reference
/// folder literally named `Unknown` would be indistinguishable from it.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Best registry candidate for one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub label: String,
    /// Best cosine similarity seen, reported even when below threshold.
    pub score: f32,
}

impl Identity {
    pub fn unknown(score: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            score,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

/// Nearest-neighbor lookup of live embeddings against the registry.
#[derive(Debug, Clone)]
pub struct Matcher {
    registry: ReferenceRegistry,
    threshold: f32,
}

impl Matcher {
    pub fn new(registry: ReferenceRegistry, threshold: f32) -> Self {
        Self {
            registry,
            threshold,
        }
    }

    /// Label of the most similar reference if its similarity is strictly
    /// above the threshold, otherwise [`UNKNOWN_LABEL`]. Ties go to the
    /// earlier reference.
    pub fn identify(&self, embedding: &Embedding) -> Identity {
        if self.registry.is_empty() {
            return Identity::unknown(0.0);
        }

        if embedding.len() != self.registry.dimension() {
            log::warn!(
                "Probe embedding has dimension {}, registry uses {}",
                embedding.len(),
                self.registry.dimension()
            );
            return Identity::unknown(0.0);
        }

        let probe = normalize_embedding(embedding.clone());
        let similarities = self.registry.similarities(&probe);

        let mut best_idx = 0;
        for (idx, &similarity) in similarities.iter().enumerate() {
            if similarity > similarities[best_idx] {
                best_idx = idx;
            }
        }
        let score = similarities[best_idx];

        if score > self.threshold {
            Identity {
                label: self.registry.faces()[best_idx].label().to_string(),
                score,
            }
        } else {
            Identity::unknown(score)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ReferenceFace;
    use ndarray::arr1;

    fn registry(faces: Vec<(&str, Embedding)>) -> ReferenceRegistry {
        ReferenceRegistry::new(
            faces
                .into_iter()
                .map(|(label, embedding)| ReferenceFace::new(label, embedding))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_registry_is_unknown() {
        let matcher = Matcher::new(ReferenceRegistry::empty(), 0.5);
        let identity = matcher.identify(&arr1(&[0.3, 0.4]));
        assert_eq!(identity, Identity::unknown(0.0));
        assert!(!identity.is_known());
    }

    #[test]
    fn test_exact_match_scores_one() {
        let e = arr1(&[0.2, -0.7, 0.4]);
        let matcher = Matcher::new(registry(vec![("Alice", e.clone())]), 0.5);

        let identity = matcher.identify(&e);
        assert_eq!(identity.label, "Alice");
        assert!((identity.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_picks_highest_similarity() {
        // probe [1, 0]: similarities 0.6 and 0.9
        let matcher = Matcher::new(
            registry(vec![
                ("low", arr1(&[0.6, 0.8])),
                ("high", arr1(&[0.9, (1.0f32 - 0.81).sqrt()])),
            ]),
            0.5,
        );

        let identity = matcher.identify(&arr1(&[1.0, 0.0]));
        assert_eq!(identity.label, "high");
        assert!((identity.score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_below_threshold_keeps_raw_score() {
        let matcher = Matcher::new(registry(vec![("Bob", arr1(&[0.4, (1.0f32 - 0.16).sqrt()]))]), 0.5);

        let identity = matcher.identify(&arr1(&[1.0, 0.0]));
        assert_eq!(identity.label, UNKNOWN_LABEL);
        assert!((identity.score - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_is_strict() {
        let matcher = Matcher::new(registry(vec![("Bob", arr1(&[1.0, 0.0]))]), 1.0);
        assert!(!matcher.identify(&arr1(&[1.0, 0.0])).is_known());
    }

    #[test]
    fn test_probe_is_normalized() {
        let matcher = Matcher::new(registry(vec![("Alice", arr1(&[1.0, 0.0]))]), 0.5);
        let identity = matcher.identify(&arr1(&[25.0, 0.0]));
        assert_eq!(identity.label, "Alice");
        assert!((identity.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_reference() {
        let matcher = Matcher::new(
            registry(vec![("first", arr1(&[1.0, 0.0])), ("second", arr1(&[1.0, 0.0]))]),
            0.5,
        );
        assert_eq!(matcher.identify(&arr1(&[1.0, 0.0])).label, "first");
    }

    #[test]
    fn test_dimension_mismatch_is_unknown() {
        let matcher = Matcher::new(registry(vec![("Alice", arr1(&[1.0, 0.0]))]), 0.5);
        assert_eq!(matcher.identify(&arr1(&[1.0, 0.0, 0.0])), Identity::unknown(0.0));
    }
}
