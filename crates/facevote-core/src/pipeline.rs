//! The verification core wired together.
//!
//! A [`FacePipeline`] owns only immutable, shareable model state (detector models,
//! encoder, liveness providers) and can serve concurrent requests.

use std::sync::Arc;
use std::thread;

use image::RgbImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::faces::comparer::{verify, VerificationResult};
use crate::faces::detector::{largest_face, FaceBox, RegionDetector};
use crate::faces::encoding::{EncodingStrategy, FaceEncoding, FeatureEncoder};
use crate::faces::quality::{QualityAssessor, QualityIssue, QualityReport};
use crate::liveness::{LivenessDetector, LivenessResult};

pub const DEFAULT_HANDCRAFTED_THRESHOLD: f64 = 0.6;
pub const DEFAULT_DEEP_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub handcrafted_threshold: f64,
    pub deep_threshold: f64,
    /// Gate handcrafted encoding on [`QualityAssessor`]; the deep strategy is
    /// always gated.
    pub quality_gate_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handcrafted_threshold: DEFAULT_HANDCRAFTED_THRESHOLD,
            deep_threshold: DEFAULT_DEEP_THRESHOLD,
            quality_gate_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn threshold_for(&self, strategy: EncodingStrategy) -> f64 {
        match strategy {
            EncodingStrategy::Handcrafted => self.handcrafted_threshold,
            EncodingStrategy::DeepEmbedding => self.deep_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodedFace {
    pub encoding: FaceEncoding,
    pub face: FaceBox,
    /// `None` when the gate was skipped.
    pub quality: Option<QualityReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoEnrolledEncodings,
    SpoofDetected,
    NoFaceDetected,
    LowQuality,
    EncodingFailed,
    ThresholdNotReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationOutcome {
    pub accepted: bool,
    pub failure: Option<FailureReason>,
    pub verification: Option<VerificationResult>,
    pub liveness: LivenessResult,
    pub message: String,
}

impl AuthenticationOutcome {
    fn rejected(
        failure: FailureReason,
        message: impl Into<String>,
        liveness: LivenessResult,
        verification: Option<VerificationResult>,
    ) -> Self {
        Self {
            accepted: false,
            failure: Some(failure),
            verification,
            liveness,
            message: message.into(),
        }
    }
}

pub struct FacePipeline {
    detector: Arc<dyn RegionDetector>,
    quality: QualityAssessor<Arc<dyn RegionDetector>>,
    encoder: Box<dyn FeatureEncoder>,
    liveness: LivenessDetector,
    config: PipelineConfig,
}

impl FacePipeline {
    pub fn new(
        detector: Arc<dyn RegionDetector>,
        encoder: Box<dyn FeatureEncoder>,
        liveness: LivenessDetector,
        config: PipelineConfig,
    ) -> Self {
        Self {
            quality: QualityAssessor::new(Arc::clone(&detector)),
            detector,
            encoder,
            liveness,
            config,
        }
    }

    pub fn with_quality(mut self, quality: QualityAssessor<Arc<dyn RegionDetector>>) -> Self {
        self.quality = quality;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn strategy(&self) -> EncodingStrategy {
        self.encoder.strategy()
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold_for(self.strategy())
    }

    pub fn liveness(&self) -> &LivenessDetector {
        &self.liveness
    }

    pub fn detect(&self, image: &RgbImage) -> Vec<FaceBox> {
        self.detector.detect_rgb(image)
    }

    pub fn assess_quality(&self, image: &RgbImage) -> QualityReport {
        self.quality.assess(image)
    }

    /// Detect, gate and encode the largest face in `image`.
    pub fn encode(&self, image: &RgbImage) -> AppResult<EncodedFace> {
        let gated = self.encoder.requires_quality_gate() || self.config.quality_gate_enabled;

        let (face, quality) = if gated {
            let report = self.quality.assess(image);
            if !report.passed {
                info!(
                    target: "facevote::quality",
                    reason = %report.reason,
                    score = report.score,
                    "capture rejected by quality gate"
                );
                return Err(match report.issue {
                    Some(QualityIssue::NoFace) => AppError::NoFaceDetected,
                    _ => AppError::LowQuality {
                        reason: report.reason,
                        score: report.score,
                    },
                });
            }
            let face = report.face.ok_or(AppError::NoFaceDetected)?;
            (face, Some(report))
        } else {
            warn!(
                target: "facevote::quality",
                strategy = %self.encoder.strategy(),
                "quality gate disabled; encoding capture without pre-filtering"
            );
            let face = largest_face(&self.detect(image)).ok_or(AppError::NoFaceDetected)?;
            (face, None)
        };

        let encoding = self.encoder.encode(image, face)?;
        Ok(EncodedFace {
            encoding,
            face,
            quality,
        })
    }

    /// Threshold follows the probe's strategy.
    pub fn verify(&self, enrolled: &[FaceEncoding], probe: Option<&FaceEncoding>) -> VerificationResult {
        let strategy = probe.map_or(self.strategy(), |p| p.strategy);
        verify(enrolled, probe, self.config.threshold_for(strategy))
    }

    pub fn check_liveness(&self, image: &RgbImage) -> LivenessResult {
        self.liveness.check(image)
    }

    /// Full authentication attempt: liveness and encoding run side by side,
    /// an explicit spoof verdict rejects before any matching happens.
    pub fn authenticate(
        &self,
        image: &RgbImage,
        enrolled: &[FaceEncoding],
    ) -> AppResult<AuthenticationOutcome> {
        if enrolled.is_empty() {
            return Ok(AuthenticationOutcome::rejected(
                FailureReason::NoEnrolledEncodings,
                "No face data enrolled for this identity",
                LivenessResult::unknown("not evaluated"),
                None,
            ));
        }

        let (liveness, encoded) = thread::scope(|scope| {
            let liveness = scope.spawn(|| self.liveness.check(image));
            let encoded = self.encode(image);
            let liveness = liveness.join().unwrap_or_else(|_| {
                warn!(target: "facevote::liveness", "liveness worker panicked");
                LivenessResult::unknown("liveness check aborted")
            });
            (liveness, encoded)
        });

        if liveness.is_spoof() {
            warn!(
                target: "facevote::liveness",
                provider = %liveness.provider,
                reason = %liveness.reason,
                "spoof detected; rejecting before face matching"
            );
            let message = format!("Fake face detected! {}", liveness.reason);
            return Ok(AuthenticationOutcome::rejected(
                FailureReason::SpoofDetected,
                message.trim_end(),
                liveness,
                None,
            ));
        }

        let probe = match encoded {
            Ok(encoded) => encoded.encoding,
            Err(AppError::NoFaceDetected) => {
                return Ok(AuthenticationOutcome::rejected(
                    FailureReason::NoFaceDetected,
                    "No face detected in image. Please try again",
                    liveness,
                    None,
                ))
            }
            Err(AppError::LowQuality { reason, .. }) => {
                return Ok(AuthenticationOutcome::rejected(
                    FailureReason::LowQuality,
                    reason,
                    liveness,
                    None,
                ))
            }
            Err(AppError::EncodingFailed(message)) => {
                warn!(error = %message, "probe encoding failed");
                return Ok(AuthenticationOutcome::rejected(
                    FailureReason::EncodingFailed,
                    "Face could not be encoded. Please try again",
                    liveness,
                    None,
                ));
            }
            Err(other) => return Err(other),
        };

        let verification = self.verify(enrolled, Some(&probe));
        if verification.is_match {
            Ok(AuthenticationOutcome {
                accepted: true,
                failure: None,
                message: "Authentication successful! Face verified.".into(),
                verification: Some(verification),
                liveness,
            })
        } else {
            let message = format!(
                "Face does not match identity. Distance: {:.2}",
                verification.distance
            );
            Ok(AuthenticationOutcome::rejected(
                FailureReason::ThresholdNotReached,
                message,
                liveness,
                Some(verification),
            ))
        }
    }
}
