use image::{GrayImage, RgbImage};
use imageproc::filter::laplacian_filter;
use serde::Serialize;
use tracing::debug;

use crate::faces::detector::{largest_face, to_gray, FaceBox, RegionDetector};

/// Cut-offs applied by [`QualityAssessor`], on the 8-bit intensity scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub min_sharpness: f64,
    pub min_face_side: u32,
    pub min_score: f64,
    pub sharpness_cap: f64,
    pub face_area_cap: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_brightness: 40.0,
            max_brightness: 220.0,
            min_sharpness: 15.0,
            min_face_side: 120,
            min_score: 0.25,
            sharpness_cap: 500.0,
            face_area_cap: 300.0 * 300.0,
        }
    }
}

/// Which check rejected a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    TooDark,
    Overexposed,
    Blurry,
    NoFace,
    FaceTooSmall,
    LowScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub passed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<QualityIssue>,
    /// Composite score in `[0, 1]`; `0.0` when an individual check failed.
    pub score: f64,
    /// Largest detected face, when detection ran and found one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceBox>,
}

impl QualityReport {
    fn rejected(
        issue: QualityIssue,
        reason: impl Into<String>,
        score: f64,
        face: Option<FaceBox>,
    ) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            issue: Some(issue),
            score,
            face,
        }
    }
}

/// Pre-encoding filter for dark, blurry or badly framed captures.
///
/// Checks run in a fixed order and stop at the first failure, so a dark
/// frame never reaches the face detector.
#[derive(Debug, Clone)]
pub struct QualityAssessor<D> {
    detector: D,
    thresholds: QualityThresholds,
}

impl<D: RegionDetector> QualityAssessor<D> {
    pub fn new(detector: D) -> Self {
        Self::with_thresholds(detector, QualityThresholds::default())
    }

    pub fn with_thresholds(detector: D, thresholds: QualityThresholds) -> Self {
        Self {
            detector,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn assess(&self, image: &RgbImage) -> QualityReport {
        let limits = &self.thresholds;
        let gray = to_gray(image);

        let mean = brightness(&gray);
        if mean < limits.min_brightness {
            debug!(target: "facevote::quality", brightness = mean, "rejected: too dark");
            return QualityReport::rejected(
                QualityIssue::TooDark,
                "Image too dark. Please ensure good lighting.",
                0.0,
                None,
            );
        }
        if mean > limits.max_brightness {
            debug!(target: "facevote::quality", brightness = mean, "rejected: overexposed");
            return QualityReport::rejected(
                QualityIssue::Overexposed,
                "Image overexposed. Reduce lighting.",
                0.0,
                None,
            );
        }

        let sharpness = laplacian_variance(&gray);
        if sharpness < limits.min_sharpness {
            debug!(target: "facevote::quality", sharpness, "rejected: blurry");
            return QualityReport::rejected(
                QualityIssue::Blurry,
                "Image too blurry. Hold camera steady.",
                0.0,
                None,
            );
        }

        let Some(face) = largest_face(&self.detector.detect(&gray)) else {
            debug!(target: "facevote::quality", "rejected: no face");
            return QualityReport::rejected(
                QualityIssue::NoFace,
                "No face detected. Position face in center.",
                0.0,
                None,
            );
        };

        if face.width < limits.min_face_side || face.height < limits.min_face_side {
            debug!(
                target: "facevote::quality",
                width = face.width,
                height = face.height,
                "rejected: face too small"
            );
            return QualityReport::rejected(
                QualityIssue::FaceTooSmall,
                "Face too small. Move closer to camera.",
                0.0,
                Some(face),
            );
        }

        let brightness_score = 1.0 - (mean - 128.0).abs() / 128.0;
        let sharpness_score = (sharpness / limits.sharpness_cap).min(1.0);
        let size_score = (face.area() as f64 / limits.face_area_cap).min(1.0);
        let score = ((brightness_score + sharpness_score + size_score) / 3.0).clamp(0.0, 1.0);

        debug!(
            target: "facevote::quality",
            brightness = mean,
            sharpness,
            face_width = face.width,
            face_height = face.height,
            score,
            "quality assessed"
        );

        if score < limits.min_score {
            return QualityReport::rejected(
                QualityIssue::LowScore,
                format!("Image quality too low ({score:.2}). Improve lighting and focus."),
                score,
                Some(face),
            );
        }

        QualityReport {
            passed: true,
            reason: "Good quality".into(),
            issue: None,
            score,
            face: Some(face),
        }
    }
}

/// Mean intensity of a grayscale image.
pub fn brightness(gray: &GrayImage) -> f64 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64
}

/// Population variance of the 4-neighbour Laplacian response.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let response = laplacian_filter(gray);
    let values: Vec<f64> = response.pixels().map(|p| f64::from(p[0])).collect();
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
