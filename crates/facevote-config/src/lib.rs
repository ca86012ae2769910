use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use facevote_core::faces::encoding::EncodingStrategy;
use facevote_core::liveness::ProviderSpec;
use facevote_core::pipeline::{PipelineConfig, DEFAULT_DEEP_THRESHOLD, DEFAULT_HANDCRAFTED_THRESHOLD};

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facevote/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facevote/config.toml";
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 10;
pub const FACE_CASCADE_ENV: &str = "FACEVOTE_FACE_CASCADE";
pub const EYE_CASCADE_ENV: &str = "FACEVOTE_EYE_CASCADE";
pub const FACE_MODEL_ENV: &str = "FACEVOTE_FACE_MODEL";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub encoder: Option<String>,
    pub handcrafted_threshold: Option<f64>,
    pub deep_threshold: Option<f64>,
    pub quality_gate_enabled: Option<bool>,
    pub face_cascade: Option<PathBuf>,
    pub eye_cascade: Option<PathBuf>,
    pub face_model: Option<PathBuf>,
    pub embedding_model: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    pub enrollment_store_dir: Option<PathBuf>,
    pub liveness_timeout_secs: Option<u64>,
    #[serde(default)]
    pub liveness_providers: Vec<LivenessProviderConfig>,
}

/// One `[[liveness_providers]]` table. Order in the file is priority order.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct LivenessProviderConfig {
    pub name: String,
    pub credential: Option<String>,
    pub credential_env: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl LivenessProviderConfig {
    /// Conventional environment variable holding this provider's key.
    pub fn conventional_env(&self) -> Option<&'static str> {
        match self.name.to_ascii_lowercase().as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "gemini" => Some("GEMINI_API_KEY"),
            _ => None,
        }
    }

    pub fn resolve_credential(&self) -> Option<String> {
        self.resolve_credential_with(|key| env::var(key).ok())
    }

    pub fn resolve_credential_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: String| (!value.trim().is_empty()).then_some(value);

        if let Some(value) = self.credential.clone().and_then(non_empty) {
            return Some(value);
        }
        if let Some(value) = self
            .credential_env
            .as_deref()
            .and_then(&lookup)
            .and_then(non_empty)
        {
            return Some(value);
        }
        self.conventional_env()
            .and_then(&lookup)
            .and_then(non_empty)
    }

    pub fn to_spec(&self) -> ProviderSpec {
        ProviderSpec {
            name: self.name.clone(),
            credential: self.resolve_credential(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub encoder: EncodingStrategy,
    pub handcrafted_threshold: f64,
    pub deep_threshold: f64,
    pub quality_gate_enabled: bool,
    pub face_cascade: Option<PathBuf>,
    pub eye_cascade: Option<PathBuf>,
    pub face_model: Option<PathBuf>,
    pub embedding_model: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    /// `None` defers to `$FACEVOTE_STORE_DIR`, then the built-in default.
    pub enrollment_store_dir: Option<PathBuf>,
    pub liveness_timeout: Duration,
    pub liveness_providers: Vec<LivenessProviderConfig>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Result<Self, ConfigError> {
        let encoder = match raw.encoder.as_deref() {
            Some(value) => value.parse::<EncodingStrategy>().map_err(|message| {
                ConfigError::Invalid {
                    key: "encoder",
                    message,
                }
            })?,
            None => EncodingStrategy::Handcrafted,
        };

        let handcrafted_threshold = checked_threshold(
            "handcrafted_threshold",
            raw.handcrafted_threshold.unwrap_or(DEFAULT_HANDCRAFTED_THRESHOLD),
        )?;
        let deep_threshold = checked_threshold(
            "deep_threshold",
            raw.deep_threshold.unwrap_or(DEFAULT_DEEP_THRESHOLD),
        )?;

        Ok(Self {
            encoder,
            handcrafted_threshold,
            deep_threshold,
            quality_gate_enabled: raw.quality_gate_enabled.unwrap_or(true),
            face_cascade: raw.face_cascade,
            eye_cascade: raw.eye_cascade,
            face_model: raw.face_model,
            embedding_model: raw.embedding_model,
            landmark_model: raw.landmark_model,
            enrollment_store_dir: raw.enrollment_store_dir,
            liveness_timeout: Duration::from_secs(
                raw.liveness_timeout_secs
                    .unwrap_or(DEFAULT_LIVENESS_TIMEOUT_SECS)
                    .max(1),
            ),
            liveness_providers: raw.liveness_providers,
        })
    }

    pub fn threshold_for(&self, strategy: EncodingStrategy) -> f64 {
        match strategy {
            EncodingStrategy::Handcrafted => self.handcrafted_threshold,
            EncodingStrategy::DeepEmbedding => self.deep_threshold,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            handcrafted_threshold: self.handcrafted_threshold,
            deep_threshold: self.deep_threshold,
            quality_gate_enabled: self.quality_gate_enabled,
        }
    }

    /// Providers in priority order with credentials resolved from the environment.
    pub fn provider_specs(&self) -> Vec<ProviderSpec> {
        self.liveness_providers
            .iter()
            .map(LivenessProviderConfig::to_spec)
            .collect()
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            encoder: EncodingStrategy::Handcrafted,
            handcrafted_threshold: DEFAULT_HANDCRAFTED_THRESHOLD,
            deep_threshold: DEFAULT_DEEP_THRESHOLD,
            quality_gate_enabled: true,
            face_cascade: None,
            eye_cascade: None,
            face_model: None,
            embedding_model: None,
            landmark_model: None,
            enrollment_store_dir: None,
            liveness_timeout: Duration::from_secs(DEFAULT_LIVENESS_TIMEOUT_SECS),
            liveness_providers: Vec::new(),
        }
    }
}

/// Match thresholds are distances in (0, 1]; anything else would accept
/// every face or none.
fn checked_threshold(key: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{value} is outside (0, 1]"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn into_contents(self) -> ConfigFile {
        self.contents
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

pub fn default_config_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_config() -> Result<Option<LoadedConfig>, ConfigError> {
    load_from_paths(&default_config_paths())
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_config_paths())
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => {
            let source = entry.source.clone();
            let resolved = ResolvedConfig::from_raw(entry.contents).map_err(|err| match err {
                ConfigError::Invalid { key, message } => ConfigError::Parse {
                    path: source.clone(),
                    message: format!("invalid value for `{key}`: {message}"),
                },
                other => other,
            })?;
            Ok(ResolvedConfigWithSource {
                resolved,
                source: Some(source),
            })
        }
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn primary_path_wins() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("primary.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "handcrafted_threshold = 0.5").unwrap();
        fs::write(&primary, "handcrafted_threshold = 0.55").unwrap();

        let loaded = load_from_paths(&[primary.clone(), secondary.clone()])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, primary);
        assert_eq!(loaded.contents.handcrafted_threshold, Some(0.55));
    }

    #[test]
    fn secondary_used_when_primary_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "encoder = \"deep\"").unwrap();

        let loaded = load_from_paths(&[missing, secondary.clone()])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, secondary);
        assert_eq!(loaded.contents.encoder.as_deref(), Some("deep"));
    }

    #[test]
    fn parse_errors_are_reported() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "enrollment_store_dir = { invalid = true }").unwrap();

        let err = load_from_paths(&[broken.clone()]).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, broken),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn io_errors_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dir.toml");
        fs::create_dir_all(&path).unwrap();

        let err = load_from_paths(&[path.clone()]).unwrap_err();
        match err {
            ConfigError::Read { path: err_path, .. } => assert_eq!(err_path, path),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unknown_encoder_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "encoder = \"eigenfaces\"").unwrap();

        let err = load_resolved_from_paths(&[path.clone()]).unwrap_err();
        match err {
            ConfigError::Parse { path: err_path, message } => {
                assert_eq!(err_path, path);
                assert!(message.contains("encoder"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn resolved_defaults_apply_when_missing() {
        let resolved = load_resolved_from_paths(&[]).unwrap();
        assert!(resolved.source.is_none());
        let config = resolved.resolved;
        assert_eq!(config.encoder, EncodingStrategy::Handcrafted);
        assert_eq!(config.threshold_for(EncodingStrategy::Handcrafted), 0.6);
        assert_eq!(config.threshold_for(EncodingStrategy::DeepEmbedding), 0.30);
        assert!(config.quality_gate_enabled);
        assert!(config.enrollment_store_dir.is_none());
        assert_eq!(config.liveness_timeout, Duration::from_secs(10));
        assert!(config.liveness_providers.is_empty());
    }

    #[test]
    fn full_file_resolves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
encoder = "deep"
deep_threshold = 0.35
quality_gate_enabled = false
embedding_model = "/opt/models/arcface.onnx"
liveness_timeout_secs = 0

[[liveness_providers]]
name = "openai"
credential = "sk-test"

[[liveness_providers]]
name = "gemini"
credential_env = "CUSTOM_GEMINI_KEY"
model = "gemini-1.5-pro"
"#,
        )
        .unwrap();

        let resolved = load_resolved_from_paths(&[path.clone()]).unwrap();
        assert_eq!(resolved.source, Some(path));
        let config = resolved.resolved;
        assert_eq!(config.encoder, EncodingStrategy::DeepEmbedding);
        assert_eq!(config.threshold_for(EncodingStrategy::DeepEmbedding), 0.35);
        assert!(!config.pipeline_config().quality_gate_enabled);
        assert_eq!(config.liveness_timeout, Duration::from_secs(1));
        let names: Vec<_> = config
            .liveness_providers
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["openai", "gemini"]);
        assert_eq!(config.liveness_providers[1].model.as_deref(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        for value in [f64::INFINITY, f64::NAN, -0.5, 0.0, 1.5] {
            let raw = ConfigFile {
                handcrafted_threshold: Some(value),
                ..ConfigFile::default()
            };
            match ResolvedConfig::from_raw(raw).unwrap_err() {
                ConfigError::Invalid { key, .. } => assert_eq!(key, "handcrafted_threshold"),
                other => panic!("unexpected error for {value}: {:?}", other),
            }
        }

        let raw = ConfigFile {
            deep_threshold: Some(-0.1),
            ..ConfigFile::default()
        };
        assert!(matches!(
            ResolvedConfig::from_raw(raw),
            Err(ConfigError::Invalid { key: "deep_threshold", .. })
        ));

        let raw = ConfigFile {
            handcrafted_threshold: Some(1.0),
            deep_threshold: Some(0.01),
            ..ConfigFile::default()
        };
        let config = ResolvedConfig::from_raw(raw).unwrap();
        assert_eq!(config.handcrafted_threshold, 1.0);
        assert_eq!(config.deep_threshold, 0.01);
    }

    #[test]
    fn invalid_threshold_in_file_names_the_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "deep_threshold = 1.5").unwrap();

        match load_resolved_from_paths(&[path.clone()]).unwrap_err() {
            ConfigError::Parse { path: err_path, message } => {
                assert_eq!(err_path, path);
                assert!(message.contains("deep_threshold"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn credential_resolution_order() {
        let lookup = |key: &str| match key {
            "CUSTOM_KEY" => Some("from-custom".to_string()),
            "OPENAI_API_KEY" => Some("from-conventional".to_string()),
            "EMPTY_KEY" => Some("  ".to_string()),
            _ => None,
        };

        let mut provider = LivenessProviderConfig {
            name: "openai".into(),
            credential: Some("inline".into()),
            credential_env: Some("CUSTOM_KEY".into()),
            ..LivenessProviderConfig::default()
        };
        assert_eq!(provider.resolve_credential_with(lookup).as_deref(), Some("inline"));

        provider.credential = None;
        assert_eq!(
            provider.resolve_credential_with(lookup).as_deref(),
            Some("from-custom")
        );

        provider.credential_env = Some("EMPTY_KEY".into());
        assert_eq!(
            provider.resolve_credential_with(lookup).as_deref(),
            Some("from-conventional")
        );

        let unknown = LivenessProviderConfig {
            name: "claude".into(),
            ..LivenessProviderConfig::default()
        };
        assert_eq!(unknown.resolve_credential_with(lookup), None);
    }
}
