use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use facevote_config::{
    self, ConfigError, LivenessProviderConfig, ResolvedConfig, ResolvedConfigWithSource,
    PRIMARY_CONFIG_PATH, SECONDARY_CONFIG_PATH,
};
use facevote_core::faces::detector::DetectorBackend;
use facevote_core::faces::embedding::{backend_compiled_in, EMBEDDING_MODEL_ENV};
use facevote_core::faces::encoding::EncodingStrategy;
use facevote_core::faces::store::{DEFAULT_STORE_DIR, STORE_DIR_ENV};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::{detector_model_path_with, DetectorModel};
use crate::errors::AppResult;

const CHECK_CONFIG: &str = "config";
const CHECK_FACE_DETECTOR: &str = "face_detector";
const CHECK_EYE_DETECTOR: &str = "eye_detector";
const CHECK_EMBEDDING_MODEL: &str = "embedding_model";
#[cfg(all(feature = "dlib", not(feature = "onnx")))]
const CHECK_LANDMARK_MODEL: &str = "landmark_model";
const CHECK_STORE_DIR: &str = "enrollment_store_dir";
const CHECK_LIVENESS: &str = "liveness_providers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, path: Option<&Path>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            path: path.map(|p| p.display().to_string()),
        }
    }
}

/// `ok` is false only when some check failed; warnings do not block.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorOutcome {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.is_empty())
    }
}

pub struct DoctorContext<E> {
    pub config_paths: Vec<PathBuf>,
    pub env: E,
    pub fallback_config: ResolvedConfig,
}

impl Default for DoctorContext<ProcessEnv> {
    fn default() -> Self {
        Self {
            config_paths: vec![
                PathBuf::from(PRIMARY_CONFIG_PATH),
                PathBuf::from(SECONDARY_CONFIG_PATH),
            ],
            env: ProcessEnv,
            fallback_config: ResolvedConfig::default(),
        }
    }
}

pub fn run_doctor() -> AppResult<DoctorOutcome> {
    run_doctor_with(&DoctorContext::default())
}

pub fn run_doctor_with<E: EnvSource>(ctx: &DoctorContext<E>) -> AppResult<DoctorOutcome> {
    let (config_check, resolved) = check_config(&ctx.config_paths, &ctx.fallback_config);
    let config = &resolved.resolved;

    let mut checks = vec![config_check];
    checks.push(check_face_detector(config, &ctx.env));
    checks.push(check_eye_detector(config, &ctx.env));
    checks.extend(check_embedding(config, &ctx.env));
    checks.push(check_store_dir(config, &ctx.env));
    checks.push(check_liveness(&config.liveness_providers, &ctx.env));

    let ok = checks.iter().all(|c| c.status != CheckStatus::Fail);
    Ok(DoctorOutcome { ok, checks })
}

fn check_config(paths: &[PathBuf], fallback: &ResolvedConfig) -> (DoctorCheck, ResolvedConfigWithSource) {
    let fallback_resolved = || ResolvedConfigWithSource {
        resolved: fallback.clone(),
        source: None,
    };
    let existing = paths.iter().filter(|p| p.exists()).count();

    match facevote_config::load_resolved_from_paths(paths) {
        Ok(ResolvedConfigWithSource {
            resolved,
            source: Some(source),
        }) => {
            let check = if existing > 1 {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Warn,
                    format!("Several config files exist; using {}", source.display()),
                    Some(&source),
                )
            } else {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Pass,
                    format!("Loaded config from {}", source.display()),
                    Some(&source),
                )
            };
            (
                check,
                ResolvedConfigWithSource {
                    resolved,
                    source: Some(source),
                },
            )
        }
        Ok(ResolvedConfigWithSource { source: None, .. }) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Warn,
                format!("No config file found; using defaults (tried {})", display_paths(paths)),
                None,
            ),
            fallback_resolved(),
        ),
        Err(ConfigError::Read { path, source }) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Fail,
                format!("Failed to read {}: {}", path.display(), source),
                Some(&path),
            ),
            fallback_resolved(),
        ),
        Err(err) => (
            DoctorCheck::new(CHECK_CONFIG, CheckStatus::Fail, err.to_string(), None),
            fallback_resolved(),
        ),
    }
}

fn check_face_detector<E: EnvSource>(config: &ResolvedConfig, env: &E) -> DoctorCheck {
    let model = DetectorModel::face();
    match detector_model_path_with(model, config, |key| env.get(key)) {
        Ok(path) => check_model(CHECK_FACE_DETECTOR, Some(&path)),
        Err(err) => {
            DoctorCheck::new(CHECK_FACE_DETECTOR, CheckStatus::Fail, err.human_message(), None)
        }
    }
}

/// Only the blink heuristic needs eyes, so every problem here is a warning.
fn check_eye_detector<E: EnvSource>(config: &ResolvedConfig, env: &E) -> DoctorCheck {
    if !DetectorBackend::compiled().detects_eyes() {
        return DoctorCheck::new(
            CHECK_EYE_DETECTOR,
            CheckStatus::Warn,
            "Blink checks unavailable: this build has no OpenCV cascades (enable `opencv`)",
            None,
        );
    }
    match detector_model_path_with(DetectorModel::EyeCascade, config, |key| env.get(key)) {
        Ok(path) => {
            let check = check_model(CHECK_EYE_DETECTOR, Some(&path));
            if check.status == CheckStatus::Fail {
                DoctorCheck {
                    status: CheckStatus::Warn,
                    ..check
                }
            } else {
                check
            }
        }
        Err(err) => {
            DoctorCheck::new(CHECK_EYE_DETECTOR, CheckStatus::Warn, err.human_message(), None)
        }
    }
}

fn check_embedding<E: EnvSource>(config: &ResolvedConfig, env: &E) -> Vec<DoctorCheck> {
    if config.encoder == EncodingStrategy::Handcrafted {
        return vec![DoctorCheck::new(
            CHECK_EMBEDDING_MODEL,
            CheckStatus::Pass,
            "Handcrafted encoder selected; no embedding model required",
            None,
        )];
    }
    if !backend_compiled_in() {
        return vec![DoctorCheck::new(
            CHECK_EMBEDDING_MODEL,
            CheckStatus::Fail,
            "Deep encoder selected but this build has no embedding backend (enable `dlib` or `onnx`)",
            None,
        )];
    }

    let model = config
        .embedding_model
        .clone()
        .or_else(|| env.get(EMBEDDING_MODEL_ENV).map(PathBuf::from));
    #[allow(unused_mut)]
    let mut checks = vec![check_model(CHECK_EMBEDDING_MODEL, model.as_deref())];

    #[cfg(all(feature = "dlib", not(feature = "onnx")))]
    {
        let landmark = config.landmark_model.clone().or_else(|| {
            env.get(facevote_core::faces::embedding::LANDMARK_MODEL_ENV)
                .map(PathBuf::from)
        });
        checks.push(check_model(CHECK_LANDMARK_MODEL, landmark.as_deref()));
    }

    checks
}

fn check_model(name: &str, path: Option<&Path>) -> DoctorCheck {
    match path {
        None => DoctorCheck::new(
            name,
            CheckStatus::Fail,
            "Model path not configured; set config or env",
            None,
        ),
        Some(p) => match fs::File::open(p) {
            Ok(_) => DoctorCheck::new(
                name,
                CheckStatus::Pass,
                format!("Found model at {}", p.display()),
                Some(p),
            ),
            Err(err) => DoctorCheck::new(
                name,
                CheckStatus::Fail,
                format!("Cannot read model {}: {}", p.display(), err),
                Some(p),
            ),
        },
    }
}

fn check_store_dir<E: EnvSource>(config: &ResolvedConfig, env: &E) -> DoctorCheck {
    let path = config
        .enrollment_store_dir
        .clone()
        .or_else(|| env.get(STORE_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));

    if !path.exists() {
        return DoctorCheck::new(
            CHECK_STORE_DIR,
            CheckStatus::Warn,
            format!("Enrollment store {} missing; it is created on first enrollment", path.display()),
            Some(&path),
        );
    }
    if !path.is_dir() {
        return DoctorCheck::new(
            CHECK_STORE_DIR,
            CheckStatus::Fail,
            format!("Enrollment store {} is not a directory", path.display()),
            Some(&path),
        );
    }

    let readable = fs::read_dir(&path).is_ok();
    let writeable = NamedTempFile::new_in(&path).is_ok();
    if readable && writeable {
        DoctorCheck::new(
            CHECK_STORE_DIR,
            CheckStatus::Pass,
            format!("Enrollment store {} is readable/writable", path.display()),
            Some(&path),
        )
    } else {
        let missing = match (readable, writeable) {
            (false, false) => "read/write",
            (false, true) => "read",
            _ => "write",
        };
        DoctorCheck::new(
            CHECK_STORE_DIR,
            CheckStatus::Fail,
            format!("Enrollment store {} lacks {missing} permissions", path.display()),
            Some(&path),
        )
    }
}

fn check_liveness<E: EnvSource>(providers: &[LivenessProviderConfig], env: &E) -> DoctorCheck {
    if providers.is_empty() {
        return DoctorCheck::new(
            CHECK_LIVENESS,
            CheckStatus::Warn,
            "No liveness provider configured; face matching decides alone",
            None,
        );
    }

    let mut ready = Vec::new();
    let mut problems = Vec::new();
    for provider in providers {
        if provider.conventional_env().is_none() {
            problems.push(format!("{} (unknown provider)", provider.name));
        } else if provider.resolve_credential_with(|key| env.get(key)).is_none() {
            problems.push(format!("{} (no credential)", provider.name));
        } else {
            ready.push(provider.name.clone());
        }
    }

    match (ready.is_empty(), problems.is_empty()) {
        (false, true) => DoctorCheck::new(
            CHECK_LIVENESS,
            CheckStatus::Pass,
            format!("Providers ready: {}", ready.join(", ")),
            None,
        ),
        (false, false) => DoctorCheck::new(
            CHECK_LIVENESS,
            CheckStatus::Warn,
            format!(
                "Providers ready: {}; skipped: {}",
                ready.join(", "),
                problems.join(", ")
            ),
            None,
        ),
        (true, _) => DoctorCheck::new(
            CHECK_LIVENESS,
            CheckStatus::Warn,
            format!(
                "No usable liveness provider; skipped: {}",
                problems.join(", ")
            ),
            None,
        ),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MapEnv(HashMap<String, String>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn write_fixtures(tmp: &Path) {
        fs::create_dir_all(tmp.join("store")).unwrap();
        fs::write(tmp.join("face.xml"), "<opencv_storage/>").unwrap();
        fs::write(tmp.join("eye.xml"), "<opencv_storage/>").unwrap();
        fs::write(tmp.join("seeta.bin"), [0u8; 16]).unwrap();
    }

    fn write_config(tmp: &Path, extra: &str) {
        fs::write(
            tmp.join("config.toml"),
            format!(
                "face_cascade = \"{}\"\neye_cascade = \"{}\"\nface_model = \"{}\"\nenrollment_store_dir = \"{}\"\n{extra}",
                tmp.join("face.xml").display(),
                tmp.join("eye.xml").display(),
                tmp.join("seeta.bin").display(),
                tmp.join("store").display(),
            ),
        )
        .unwrap();
    }

    fn eye_status_when_configured() -> CheckStatus {
        if DetectorBackend::compiled().detects_eyes() {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        }
    }

    fn doctor_with(tmp: &Path, env: MapEnv) -> DoctorOutcome {
        let ctx = DoctorContext {
            config_paths: vec![tmp.join("config.toml")],
            env,
            fallback_config: ResolvedConfig::default(),
        };
        run_doctor_with(&ctx).unwrap()
    }

    fn status<'a>(checks: &'a [DoctorCheck], name: &str) -> &'a DoctorCheck {
        checks
            .iter()
            .find(|c| c.name == name)
            .expect("check present")
    }

    #[test]
    fn doctor_success_when_all_checks_pass() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        write_config(
            tmp.path(),
            "[[liveness_providers]]\nname = \"openai\"\ncredential = \"sk-test\"\n",
        );

        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert!(outcome.ok, "statuses: {:?}", outcome.checks);
        assert!(
            outcome
                .checks
                .iter()
                .filter(|c| c.name != CHECK_EYE_DETECTOR)
                .all(|c| c.status == CheckStatus::Pass),
            "statuses: {:?}",
            outcome.checks
        );
        assert_eq!(
            status(&outcome.checks, CHECK_EYE_DETECTOR).status,
            eye_status_when_configured()
        );
    }

    #[test]
    fn missing_config_is_a_warning() {
        let tmp = tempdir().unwrap();
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(status(&outcome.checks, CHECK_CONFIG).status, CheckStatus::Warn);
        assert_eq!(
            status(&outcome.checks, CHECK_FACE_DETECTOR).status,
            CheckStatus::Fail
        );
        assert!(!outcome.ok);
    }

    #[test]
    fn parse_error_fails() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("config.toml"), "face_cascade = { bad = true }").unwrap();
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(status(&outcome.checks, CHECK_CONFIG).status, CheckStatus::Fail);
        assert!(!outcome.ok);
    }

    #[test]
    fn face_model_resolves_from_environment() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        let mut env = MapEnv::default();
        env.0.insert(
            facevote_config::FACE_CASCADE_ENV.into(),
            tmp.path().join("face.xml").display().to_string(),
        );
        env.0.insert(
            facevote_config::FACE_MODEL_ENV.into(),
            tmp.path().join("seeta.bin").display().to_string(),
        );
        let outcome = doctor_with(tmp.path(), env);
        assert_eq!(
            status(&outcome.checks, CHECK_FACE_DETECTOR).status,
            CheckStatus::Pass
        );
        assert_eq!(status(&outcome.checks, CHECK_EYE_DETECTOR).status, CheckStatus::Warn);
    }

    #[test]
    fn unreadable_face_model_fails() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        fs::remove_file(tmp.path().join("face.xml")).unwrap();
        fs::remove_file(tmp.path().join("seeta.bin")).unwrap();
        write_config(tmp.path(), "");
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(
            status(&outcome.checks, CHECK_FACE_DETECTOR).status,
            CheckStatus::Fail
        );
        assert!(!outcome.ok);
    }

    #[test]
    fn missing_eye_cascade_only_warns() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        fs::remove_file(tmp.path().join("eye.xml")).unwrap();
        write_config(tmp.path(), "");
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(status(&outcome.checks, CHECK_EYE_DETECTOR).status, CheckStatus::Warn);
        assert!(outcome.ok, "statuses: {:?}", outcome.checks);
    }

    #[test]
    fn providers_without_credentials_warn() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        write_config(
            tmp.path(),
            "[[liveness_providers]]\nname = \"openai\"\n\n[[liveness_providers]]\nname = \"gemini\"\n",
        );
        let mut env = MapEnv::default();
        env.0.insert("GEMINI_API_KEY".into(), "g-key".into());

        let outcome = doctor_with(tmp.path(), env);
        let check = status(&outcome.checks, CHECK_LIVENESS);
        assert_eq!(check.status, CheckStatus::Warn);
        assert!(check.message.contains("gemini"));
        assert!(check.message.contains("openai (no credential)"));
        assert!(outcome.ok);
    }

    #[cfg(not(any(feature = "dlib", feature = "onnx")))]
    #[test]
    fn deep_encoder_without_backend_fails() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        write_config(tmp.path(), "encoder = \"deep\"\n");
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(
            status(&outcome.checks, CHECK_EMBEDDING_MODEL).status,
            CheckStatus::Fail
        );
    }

    #[test]
    fn store_that_is_a_file_fails() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path());
        fs::remove_dir(tmp.path().join("store")).unwrap();
        fs::write(tmp.path().join("store"), "not a dir").unwrap();
        write_config(tmp.path(), "");
        let outcome = doctor_with(tmp.path(), MapEnv::default());
        assert_eq!(status(&outcome.checks, CHECK_STORE_DIR).status, CheckStatus::Fail);
    }
}
