use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::faces::detector::FaceBox;

/// Which encoder produced a vector. Vectors from different strategies live
/// on different distance scales and are never compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
    Handcrafted,
    DeepEmbedding,
}

impl EncodingStrategy {
    pub fn metric(self) -> DistanceMetric {
        match self {
            EncodingStrategy::Handcrafted => DistanceMetric::ScaledEuclidean,
            EncodingStrategy::DeepEmbedding => DistanceMetric::Cosine,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncodingStrategy::Handcrafted => "handcrafted",
            EncodingStrategy::DeepEmbedding => "deep_embedding",
        }
    }
}

impl fmt::Display for EncodingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "handcrafted" => Ok(EncodingStrategy::Handcrafted),
            "deep" | "deep_embedding" | "deep-embedding" => Ok(EncodingStrategy::DeepEmbedding),
            other => Err(format!(
                "unknown encoder '{other}' (expected 'handcrafted' or 'deep')"
            )),
        }
    }
}

/// Normalised distance used to compare two encodings of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance of unit vectors divided by sqrt(2), capped at 1.
    ScaledEuclidean,
    /// `(1 - cos) / 2`.
    Cosine,
}

/// A face signature tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEncoding {
    pub vector: Vec<f64>,
    pub strategy: EncodingStrategy,
}

impl FaceEncoding {
    pub fn new(vector: Vec<f64>, strategy: EncodingStrategy) -> Self {
        Self { vector, strategy }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f64 {
        self.vector.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Same strategy and dimension; the only pairs the comparer scores.
    pub fn is_comparable_with(&self, other: &FaceEncoding) -> bool {
        self.strategy == other.strategy && self.dimension() == other.dimension()
    }
}

/// Capability contract shared by the handcrafted and deep strategies.
pub trait FeatureEncoder: Send + Sync {
    fn strategy(&self) -> EncodingStrategy;

    /// Fixed output length, when the strategy has one.
    fn expected_dimension(&self) -> Option<usize>;

    fn compatible_metric(&self) -> DistanceMetric {
        self.strategy().metric()
    }

    /// Whether encoding must never run on a capture that failed the quality gate.
    fn requires_quality_gate(&self) -> bool;

    fn encode(&self, image: &RgbImage, face: FaceBox) -> AppResult<FaceEncoding>;
}

impl<E: FeatureEncoder + ?Sized> FeatureEncoder for Box<E> {
    fn strategy(&self) -> EncodingStrategy {
        (**self).strategy()
    }

    fn expected_dimension(&self) -> Option<usize> {
        (**self).expected_dimension()
    }

    fn compatible_metric(&self) -> DistanceMetric {
        (**self).compatible_metric()
    }

    fn requires_quality_gate(&self) -> bool {
        (**self).requires_quality_gate()
    }

    fn encode(&self, image: &RgbImage, face: FaceBox) -> AppResult<FaceEncoding> {
        (**self).encode(image, face)
    }
}
