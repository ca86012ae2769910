use std::f64::consts::SQRT_2;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::faces::encoding::{DistanceMetric, FaceEncoding};

/// Outcome of comparing one probe against an identity's enrolled encodings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub is_match: bool,
    /// Best normalised distance, `1.0` when nothing could be compared.
    pub distance: f64,
    pub matched_index: Option<usize>,
    pub compared: usize,
    pub skipped: usize,
}

impl VerificationResult {
    pub fn no_match() -> Self {
        Self {
            is_match: false,
            distance: 1.0,
            matched_index: None,
            compared: 0,
            skipped: 0,
        }
    }
}

/// Normalised distance in `[0, 1]`, or `None` when the pair is not comparable.
pub fn normalized_distance(lhs: &FaceEncoding, rhs: &FaceEncoding) -> Option<f64> {
    if !lhs.is_comparable_with(rhs) {
        return None;
    }

    let distance = match lhs.strategy.metric() {
        DistanceMetric::ScaledEuclidean => scaled_euclidean_distance(&lhs.vector, &rhs.vector),
        DistanceMetric::Cosine => {
            let distance = cosine_distance(&lhs.vector, &rhs.vector);
            debug!(
                target: "facevote::verify",
                cosine = distance,
                euclidean = euclidean_distance(&lhs.vector, &rhs.vector),
                "compared deep embeddings"
            );
            distance
        }
    };
    Some(distance)
}

pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs)
        .map(|(l, r)| (l - r).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Euclidean distance between the unit-scaled vectors, divided by sqrt(2).
pub fn scaled_euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    let unit = |values: &[f64]| -> Vec<f64> {
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            values.iter().map(|v| v / norm).collect()
        } else {
            values.to_vec()
        }
    };
    (euclidean_distance(&unit(lhs), &unit(rhs)) / SQRT_2).min(1.0)
}

pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> Option<f64> {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denominator = (norm_lhs * norm_rhs).sqrt();
    if denominator <= 0.0 {
        return None;
    }
    // Rounding in long sums can leave a vector short of similarity 1 with itself.
    if lhs == rhs {
        return Some(1.0);
    }
    Some((dot / denominator).clamp(-1.0, 1.0))
}

/// `(1 - cos) / 2`; a zero vector is maximally distant from everything.
pub fn cosine_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    cosine_similarity(lhs, rhs).map_or(1.0, |similarity| (1.0 - similarity) / 2.0)
}

/// Compare `probe` with every compatible enrolled encoding and decide on the
/// closest one. A match requires `distance < threshold`.
pub fn verify(
    enrolled: &[FaceEncoding],
    probe: Option<&FaceEncoding>,
    threshold: f64,
) -> VerificationResult {
    let Some(probe) = probe else {
        info!(target: "facevote::verify", "verification failed: no probe encoding");
        return VerificationResult::no_match();
    };
    if enrolled.is_empty() {
        info!(target: "facevote::verify", "verification failed: no enrolled encodings");
        return VerificationResult::no_match();
    }

    let mut best: Option<(usize, f64)> = None;
    let mut skipped = 0;
    for (index, candidate) in enrolled.iter().enumerate() {
        let Some(distance) = normalized_distance(candidate, probe) else {
            warn!(
                target: "facevote::verify",
                index,
                enrolled_strategy = %candidate.strategy,
                enrolled_dimension = candidate.dimension(),
                probe_strategy = %probe.strategy,
                probe_dimension = probe.dimension(),
                "skipping enrolled encoding with mismatched strategy or dimension"
            );
            skipped += 1;
            continue;
        };
        if best.map_or(true, |(_, current)| distance < current) {
            best = Some((index, distance));
        }
    }

    let result = match best {
        Some((index, distance)) => VerificationResult {
            is_match: distance < threshold,
            distance,
            matched_index: Some(index),
            compared: enrolled.len() - skipped,
            skipped,
        },
        None => VerificationResult {
            skipped,
            ..VerificationResult::no_match()
        },
    };

    info!(
        target: "facevote::verify",
        decision = if result.is_match { "MATCH" } else { "NO MATCH" },
        distance = result.distance,
        threshold,
        best_index = ?result.matched_index,
        enrolled = enrolled.len(),
        "verification finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::encoding::EncodingStrategy;

    fn handcrafted(vector: Vec<f64>) -> FaceEncoding {
        FaceEncoding::new(vector, EncodingStrategy::Handcrafted)
    }

    fn deep(vector: Vec<f64>) -> FaceEncoding {
        FaceEncoding::new(vector, EncodingStrategy::DeepEmbedding)
    }

    #[test]
    fn opposite_unit_vectors_hit_the_cap() {
        let d = normalized_distance(&handcrafted(vec![1.0, 0.0]), &handcrafted(vec![-1.0, 0.0]));
        assert!((d.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_vectors_under_each_metric() {
        let d = normalized_distance(&handcrafted(vec![1.0, 0.0]), &handcrafted(vec![0.0, 1.0]));
        assert!((d.unwrap() - 1.0).abs() < 1e-12);
        let d = normalized_distance(&deep(vec![1.0, 0.0]), &deep(vec![0.0, 1.0]));
        assert!((d.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cosine_distance_ignores_magnitude() {
        let d = normalized_distance(&deep(vec![2.0, 2.0]), &deep(vec![5.0, 5.0])).unwrap();
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn embedding_is_exactly_zero_distance_from_itself() {
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let vector: Vec<f64> = (0..512)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect();

        assert_eq!(cosine_distance(&vector, &vector), 0.0);
        let enrolled = vec![deep(vector.clone())];
        let result = verify(&enrolled, Some(&deep(vector)), f64::EPSILON);
        assert!(result.is_match);
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn zero_vector_is_maximally_distant_under_cosine() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn mismatched_pairs_are_not_scored() {
        assert!(normalized_distance(&handcrafted(vec![1.0]), &deep(vec![1.0])).is_none());
        assert!(normalized_distance(&handcrafted(vec![1.0]), &handcrafted(vec![1.0, 0.0])).is_none());
    }

    #[test]
    fn verify_picks_closest_compatible_candidate() {
        let enrolled = vec![
            handcrafted(vec![0.0, 1.0]),
            handcrafted(vec![1.0, 0.0, 0.0]),
            handcrafted(vec![0.8, 0.6]),
        ];
        let probe = handcrafted(vec![1.0, 0.0]);

        let result = verify(&enrolled, Some(&probe), 0.6);
        assert!(result.is_match);
        assert_eq!(result.matched_index, Some(2));
        assert_eq!(result.compared, 2);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn threshold_is_strict() {
        let enrolled = vec![deep(vec![1.0, 0.0])];
        let probe = deep(vec![0.0, 1.0]);
        let result = verify(&enrolled, Some(&probe), 0.5);
        assert!(!result.is_match);
        assert!((result.distance - 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_probe_is_no_match() {
        let enrolled = vec![deep(vec![1.0, 0.0])];
        assert_eq!(verify(&enrolled, None, 0.3), VerificationResult::no_match());
    }
}
