use std::io;
use std::process::ExitCode;

use facevote_config::ConfigError;
use thiserror::Error;

pub use facevote_core::errors::AppError as CoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Core(inner) => inner.exit_code(),
            AppError::Config(_) => ExitCode::from(2),
            AppError::InvalidArgument(_) => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        match self {
            AppError::Core(inner) => inner.human_message(),
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
