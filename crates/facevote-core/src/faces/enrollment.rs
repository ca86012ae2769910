use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::faces::detector::FaceBox;
use crate::faces::encoding::{EncodingStrategy, FaceEncoding};
use crate::faces::store::{
    identity_store_path, EnrolledEncoding, EnrollmentStore, LockMode, StoreDirResolver,
};

/// A freshly computed encoding waiting to be enrolled.
#[derive(Debug, Clone)]
pub struct EnrollmentCandidate {
    pub encoding: FaceEncoding,
    pub face: Option<FaceBox>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct FaceEnrollmentConfig {
    pub identity: String,
    pub candidates: Vec<EnrollmentCandidate>,
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FaceRemovalConfig {
    pub identity: String,
    pub encoding_ids: Vec<String>,
    pub remove_all: bool,
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnrollmentRecord {
    pub id: String,
    pub strategy: EncodingStrategy,
    pub dimension: usize,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct FaceEnrollmentOutcome {
    pub identity: String,
    pub store_path: PathBuf,
    pub added: Vec<EnrollmentRecord>,
    pub total: usize,
    pub logs: Vec<String>,
}

#[derive(Debug)]
pub struct FaceRemovalOutcome {
    pub identity: String,
    pub store_path: PathBuf,
    pub removed_ids: Vec<String>,
    pub remaining: usize,
    pub cleared: bool,
    pub logs: Vec<String>,
}

/// Append encodings to an identity's set. Every encoding of an identity must
/// share one strategy and dimension, so later verifications never skip them.
pub fn run_face_enrollment_with<S, R>(
    config: &FaceEnrollmentConfig,
    store: &S,
    resolver: &R,
) -> AppResult<FaceEnrollmentOutcome>
where
    S: EnrollmentStore,
    R: StoreDirResolver,
{
    validate_identity(&config.identity)?;
    let store_path = identity_store_path(resolver, config.store_dir.as_deref(), &config.identity);

    let (strategy, dimension) = ensure_consistent_candidates(&config.candidates, &store_path)?;
    let mut logs = vec![format!(
        "Validated {} {strategy} encoding(s) with dimension {dimension}",
        config.candidates.len()
    )];

    let _lock = store.lock(&store_path, LockMode::Exclusive)?;
    let mut existing = store.load(&store_path)?;
    if let Some(current) = existing.first() {
        if current.encoding.strategy != strategy || current.encoding.dimension() != dimension {
            return Err(AppError::EncodingValidation {
                path: store_path.clone(),
                message: format!(
                    "identity already enrolled with {} encodings of dimension {}; refusing {strategy} encodings of dimension {dimension}",
                    current.encoding.strategy,
                    current.encoding.dimension()
                ),
            });
        }
    }

    let mut added = Vec::with_capacity(config.candidates.len());
    for candidate in &config.candidates {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        existing.push(EnrolledEncoding {
            id: id.clone(),
            encoding: candidate.encoding.clone(),
            face: candidate.face,
            source: candidate.source.clone(),
            created_at: created_at.clone(),
        });
        added.push(EnrollmentRecord {
            id,
            strategy,
            dimension,
            source: candidate.source.clone(),
            created_at,
        });
    }

    store.save(&store_path, &existing)?;
    info!(
        target: "facevote::store",
        identity = %config.identity,
        added = added.len(),
        total = existing.len(),
        "enrolled encodings"
    );

    logs.push(format!(
        "Enrolled {} encoding(s) for identity {}",
        added.len(),
        config.identity
    ));
    logs.push(format!("Enrollment store: {}", store_path.display()));

    Ok(FaceEnrollmentOutcome {
        identity: config.identity.clone(),
        store_path,
        added,
        total: existing.len(),
        logs,
    })
}

pub fn run_face_removal_with<S, R>(
    config: &FaceRemovalConfig,
    store: &S,
    resolver: &R,
) -> AppResult<FaceRemovalOutcome>
where
    S: EnrollmentStore,
    R: StoreDirResolver,
{
    validate_identity(&config.identity)?;
    let store_path = identity_store_path(resolver, config.store_dir.as_deref(), &config.identity);

    let _lock = store.lock(&store_path, LockMode::Exclusive)?;
    let mut logs = Vec::new();
    let existing = store.load(&store_path)?;
    logs.push(format!(
        "Loaded {} encoding(s) for identity {}",
        existing.len(),
        config.identity
    ));

    if config.remove_all {
        let removed_ids = existing.iter().map(|entry| entry.id.clone()).collect();
        store.delete(&store_path)?;
        logs.push(format!("Removed all encodings for identity {}", config.identity));
        return Ok(FaceRemovalOutcome {
            identity: config.identity.clone(),
            store_path,
            removed_ids,
            remaining: 0,
            cleared: true,
            logs,
        });
    }

    let requested: HashSet<&String> = config.encoding_ids.iter().collect();
    if let Some(missing) = config
        .encoding_ids
        .iter()
        .find(|id| !existing.iter().any(|entry| &entry.id == *id))
    {
        return Err(AppError::EncodingNotFound {
            identity: config.identity.clone(),
            encoding_id: missing.clone(),
        });
    }

    let (removed, retained): (Vec<_>, Vec<_>) = existing
        .into_iter()
        .partition(|entry| requested.contains(&entry.id));
    let removed_ids: Vec<String> = removed.into_iter().map(|entry| entry.id).collect();

    store.save(&store_path, &retained)?;
    logs.push(format!(
        "Removed {} encoding(s) for identity {}",
        removed_ids.len(),
        config.identity
    ));
    logs.push(format!(
        "Enrollment store now contains {} encoding(s)",
        retained.len()
    ));

    Ok(FaceRemovalOutcome {
        identity: config.identity.clone(),
        store_path,
        removed_ids,
        remaining: retained.len(),
        cleared: false,
        logs,
    })
}

/// Identities become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_identity(identity: &str) -> AppResult<()> {
    if identity.is_empty() {
        return Err(AppError::InvalidIdentity {
            identity: identity.to_string(),
            message: "identity cannot be empty".into(),
        });
    }

    if !identity
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(AppError::InvalidIdentity {
            identity: identity.to_string(),
            message: "use ASCII letters, numbers, '-' or '_' only".into(),
        });
    }

    Ok(())
}

fn ensure_consistent_candidates(
    candidates: &[EnrollmentCandidate],
    path: &Path,
) -> AppResult<(EncodingStrategy, usize)> {
    let invalid = |message: String| AppError::EncodingValidation {
        path: path.to_path_buf(),
        message,
    };

    let first = candidates
        .first()
        .ok_or_else(|| invalid("no encodings to enroll".into()))?;
    let strategy = first.encoding.strategy;
    let dimension = first.encoding.dimension();
    if dimension == 0 {
        return Err(invalid("encoding vectors are empty".into()));
    }

    for (idx, candidate) in candidates.iter().enumerate() {
        let encoding = &candidate.encoding;
        if encoding.strategy != strategy || encoding.dimension() != dimension {
            return Err(invalid(format!(
                "encoding #{idx} is {} with dimension {} (expected {strategy} with dimension {dimension})",
                encoding.strategy,
                encoding.dimension()
            )));
        }
        if encoding.vector.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("encoding #{idx} contains non-finite values")));
        }
        if encoding.norm() <= f64::EPSILON {
            return Err(invalid(format!("encoding #{idx} has zero magnitude")));
        }
    }

    Ok((strategy, dimension))
}
