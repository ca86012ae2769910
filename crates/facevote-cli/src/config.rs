use std::env;
use std::path::{Path, PathBuf};

use facevote_config::{
    default_config_paths, load_resolved_from_paths, ResolvedConfig, EYE_CASCADE_ENV,
    FACE_CASCADE_ENV, FACE_MODEL_ENV,
};
use facevote_core::errors::AppError as CoreError;
use facevote_core::faces::detector::DetectorBackend;
use facevote_core::faces::encoding::EncodingStrategy;
use tracing::debug;

use crate::cli::ModelArgs;
use crate::errors::{AppError, AppResult};

/// Load the config file (if any) and layer command-line overrides on top.
pub fn load_settings(models: &ModelArgs) -> AppResult<ResolvedConfig> {
    load_settings_with_sources(models, &default_config_paths())
}

pub fn load_settings_with_sources(
    models: &ModelArgs,
    sources: &[PathBuf],
) -> AppResult<ResolvedConfig> {
    let loaded = load_resolved_from_paths(sources)?;
    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => debug!("no configuration file found; using defaults"),
    }
    apply_overrides(loaded.resolved, models)
}

pub fn apply_overrides(mut config: ResolvedConfig, models: &ModelArgs) -> AppResult<ResolvedConfig> {
    if let Some(encoder) = models.encoder.as_deref() {
        config.encoder = encoder
            .parse::<EncodingStrategy>()
            .map_err(AppError::InvalidArgument)?;
    }
    if let Some(path) = &models.face_cascade {
        config.face_cascade = Some(path.clone());
    }
    if let Some(path) = &models.face_model {
        config.face_model = Some(path.clone());
    }
    if let Some(path) = &models.embedding_model {
        config.embedding_model = Some(path.clone());
    }
    if let Some(path) = &models.landmark_model {
        config.landmark_model = Some(path.clone());
    }
    Ok(config)
}

/// Flag wins over the config file.
pub fn resolve_store_dir(cli_value: Option<PathBuf>, config: &ResolvedConfig) -> Option<PathBuf> {
    cli_value.or_else(|| config.enrollment_store_dir.clone())
}

/// Model files read by the detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorModel {
    FaceCascade,
    EyeCascade,
    SeetaFace,
}

impl DetectorModel {
    /// The face model the compiled detector backend reads.
    pub fn face() -> Self {
        match DetectorBackend::compiled() {
            DetectorBackend::HaarCascade => DetectorModel::FaceCascade,
            DetectorBackend::SeetaFace => DetectorModel::SeetaFace,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DetectorModel::FaceCascade => "face cascade",
            DetectorModel::EyeCascade => "eye cascade",
            DetectorModel::SeetaFace => "seetaface model",
        }
    }

    fn env(self) -> &'static str {
        match self {
            DetectorModel::FaceCascade => FACE_CASCADE_ENV,
            DetectorModel::EyeCascade => EYE_CASCADE_ENV,
            DetectorModel::SeetaFace => FACE_MODEL_ENV,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            DetectorModel::FaceCascade => "--face-cascade",
            DetectorModel::EyeCascade => "--eye-cascade",
            DetectorModel::SeetaFace => "--face-model",
        }
    }

    fn missing(self) -> CoreError {
        CoreError::MissingModel {
            kind: self.label(),
            flag: self.flag(),
            env: self.env(),
        }
    }

    fn configured(self, config: &ResolvedConfig) -> Option<&Path> {
        match self {
            DetectorModel::FaceCascade => config.face_cascade.as_deref(),
            DetectorModel::EyeCascade => config.eye_cascade.as_deref(),
            DetectorModel::SeetaFace => config.face_model.as_deref(),
        }
    }
}

pub fn detector_model_path(kind: DetectorModel, config: &ResolvedConfig) -> AppResult<PathBuf> {
    detector_model_path_with(kind, config, |key| env::var(key).ok())
}

pub fn detector_model_path_with<F>(
    kind: DetectorModel,
    config: &ResolvedConfig,
    lookup: F,
) -> AppResult<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    kind.configured(config)
        .map(Path::to_path_buf)
        .or_else(|| lookup(kind.env()).map(PathBuf::from))
        .ok_or_else(|| AppError::Core(kind.missing()))
}
