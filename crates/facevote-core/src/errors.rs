use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to decode image payload: {0}")]
    Decode(String),

    #[error("no face detected; please retry the capture")]
    NoFaceDetected,

    #[error("image rejected by quality gate: {reason}")]
    LowQuality { reason: String, score: f64 },

    #[error("face encoding failed: {0}")]
    EncodingFailed(String),

    #[error("deep-embedding strategy requested but no embedding backend is compiled in (enable the `dlib` or `onnx` feature)")]
    EmbeddingUnavailable,

    #[error("eye detection needs OpenCV Haar cascades (rebuild with the `opencv` feature)")]
    EyeDetectionUnavailable,

    #[error("missing {kind}; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("cascade file {path} is invalid: {message}")]
    CascadeFormat { path: PathBuf, message: String },

    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("failed to read image {path}: {message}")]
    ImageRead { path: PathBuf, message: String },

    #[error("invalid identity '{identity}': {message}")]
    InvalidIdentity { identity: String, message: String },

    #[error("no encoding with id {encoding_id} found for identity {identity}")]
    EncodingNotFound {
        identity: String,
        encoding_id: String,
    },

    #[error("encoding rejected for {path}: {message}")]
    EncodingValidation { path: PathBuf, message: String },

    #[error("failed to read enrollment store {path}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write enrollment store {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("enrollment store {path} is invalid: {message}")]
    InvalidStoreFile { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    /// Failures the end user can fix by capturing again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::NoFaceDetected | AppError::LowQuality { .. } | AppError::EncodingFailed(_)
        )
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Decode(_) => ExitCode::from(2),
            AppError::MissingInput { .. } => ExitCode::from(2),
            AppError::ImageRead { .. } => ExitCode::from(2),
            AppError::MissingModel { .. } => ExitCode::from(2),
            AppError::ModelLoad { .. } => ExitCode::from(2),
            AppError::CascadeFormat { .. } => ExitCode::from(2),
            AppError::EmbeddingUnavailable => ExitCode::from(2),
            AppError::EyeDetectionUnavailable => ExitCode::from(2),
            AppError::InvalidIdentity { .. } => ExitCode::from(2),
            AppError::InvalidStoreFile { .. } => ExitCode::from(2),
            AppError::NoFaceDetected => ExitCode::from(3),
            AppError::LowQuality { .. } => ExitCode::from(3),
            AppError::EncodingFailed(_) => ExitCode::from(3),
            AppError::EncodingValidation { .. } => ExitCode::from(3),
            AppError::EncodingNotFound { .. } => ExitCode::from(4),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;
