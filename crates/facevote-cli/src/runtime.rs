//! Builds core components from resolved settings.

use std::path::PathBuf;
use std::sync::Arc;

use facevote_config::ResolvedConfig;
use facevote_core::errors::AppError as CoreError;
use facevote_core::faces::detector::{
    open_eye_detector, open_face_detector, DetectorBackend, RegionDetector,
};
use facevote_core::faces::embedding::{
    backend_compiled_in, open_backend, DeepEncoder, EmbeddingModelConfig, EnvModelPathResolver,
    ModelPathResolver,
};
use facevote_core::faces::encoding::{EncodingStrategy, FeatureEncoder};
use facevote_core::faces::handcrafted::HandcraftedEncoder;
use facevote_core::liveness::LivenessDetector;
use facevote_core::pipeline::FacePipeline;
use tracing::{debug, info};

use crate::config::{detector_model_path, DetectorModel};
use crate::errors::AppResult;

pub fn face_detector(config: &ResolvedConfig) -> AppResult<Box<dyn RegionDetector>> {
    let model = DetectorModel::face();
    let path = detector_model_path(model, config)?;
    debug!(
        backend = DetectorBackend::compiled().name(),
        path = %path.display(),
        "loading {}",
        model.label()
    );
    Ok(open_face_detector(&path)?)
}

pub fn eye_detector(
    config: &ResolvedConfig,
    flag: Option<PathBuf>,
) -> AppResult<Box<dyn RegionDetector>> {
    if !DetectorBackend::compiled().detects_eyes() {
        return Err(CoreError::EyeDetectionUnavailable.into());
    }
    let path = match flag {
        Some(path) => path,
        None => detector_model_path(DetectorModel::EyeCascade, config)?,
    };
    debug!(path = %path.display(), "loading eye cascade");
    Ok(open_eye_detector(&path)?)
}

pub fn build_encoder(config: &ResolvedConfig) -> AppResult<Box<dyn FeatureEncoder>> {
    match config.encoder {
        EncodingStrategy::Handcrafted => Ok(Box::new(HandcraftedEncoder::new())),
        EncodingStrategy::DeepEmbedding => {
            if !backend_compiled_in() {
                return Err(CoreError::EmbeddingUnavailable.into());
            }
            let paths = EnvModelPathResolver.resolve(&EmbeddingModelConfig {
                model: config.embedding_model.clone(),
                landmark_model: config.landmark_model.clone(),
            })?;
            let backend = open_backend(&paths)?;
            info!(
                backend = backend.name(),
                model = %paths.model.display(),
                "deep embedding backend ready"
            );
            Ok(Box::new(DeepEncoder::new(backend)))
        }
    }
}

pub fn liveness_detector(config: &ResolvedConfig) -> LivenessDetector {
    let detector = LivenessDetector::from_specs(&config.provider_specs(), config.liveness_timeout);
    if !detector.is_configured() {
        info!("no liveness provider configured; relying on face matching only");
    }
    detector
}

pub fn build_pipeline(config: &ResolvedConfig) -> AppResult<FacePipeline> {
    let detector: Arc<dyn RegionDetector> = Arc::from(face_detector(config)?);
    let encoder = build_encoder(config)?;
    Ok(FacePipeline::new(
        detector,
        encoder,
        liveness_detector(config),
        config.pipeline_config(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[test]
    fn handcrafted_encoder_needs_no_model() {
        let encoder = build_encoder(&ResolvedConfig::default()).unwrap();
        assert_eq!(encoder.strategy(), EncodingStrategy::Handcrafted);
        assert!(!encoder.requires_quality_gate());
    }

    #[cfg(not(any(feature = "dlib", feature = "onnx")))]
    #[test]
    fn deep_encoder_without_backend_is_explicit() {
        let config = ResolvedConfig {
            encoder: EncodingStrategy::DeepEmbedding,
            ..ResolvedConfig::default()
        };
        let err = build_encoder(&config).err().expect("must fail");
        assert!(matches!(err, AppError::Core(CoreError::EmbeddingUnavailable)));
    }

    #[test]
    fn missing_face_model_file_is_reported() {
        let config = ResolvedConfig {
            face_cascade: Some(PathBuf::from("/nonexistent/facevote/face.xml")),
            face_model: Some(PathBuf::from("/nonexistent/facevote/seeta.bin")),
            ..ResolvedConfig::default()
        };
        let err = face_detector(&config).err().expect("must fail");
        assert!(matches!(err, AppError::Core(CoreError::ModelLoad { .. })));
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn eye_detector_needs_opencv() {
        let err = eye_detector(&ResolvedConfig::default(), Some(PathBuf::from("/etc/eye.xml")))
            .err()
            .expect("must fail");
        assert!(matches!(err, AppError::Core(CoreError::EyeDetectionUnavailable)));
    }
}
