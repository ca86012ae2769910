use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::faces::detector::FaceBox;
use crate::faces::encoding::FaceEncoding;

pub const DEFAULT_STORE_DIR: &str = "/var/lib/facevote/encodings";
pub const STORE_DIR_ENV: &str = "FACEVOTE_STORE_DIR";

/// One persisted encoding of an identity. An identity may hold several.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrolledEncoding {
    pub id: String,
    #[serde(flatten)]
    pub encoding: FaceEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceBox>,
    pub source: String,
    pub created_at: String,
}

pub trait EnrollmentStore {
    fn load(&self, path: &Path) -> AppResult<Vec<EnrolledEncoding>>;
    fn save(&self, path: &Path, encodings: &[EnrolledEncoding]) -> AppResult<()>;
    fn delete(&self, path: &Path) -> AppResult<()>;

    /// Guards `path` for the lifetime of the returned lock. Stores without
    /// concurrent writers may keep the default.
    fn lock(&self, path: &Path, mode: LockMode) -> AppResult<IdentityLock> {
        let _ = (path, mode);
        Ok(IdentityLock::unlocked())
    }
}

/// One pretty-printed JSON array per identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemEnrollmentStore;

impl EnrollmentStore for FilesystemEnrollmentStore {
    fn load(&self, path: &Path) -> AppResult<Vec<EnrolledEncoding>> {
        read_enrollment_file(path)
    }

    fn save(&self, path: &Path, encodings: &[EnrolledEncoding]) -> AppResult<()> {
        write_enrollment_file(path, encodings)
    }

    fn delete(&self, path: &Path) -> AppResult<()> {
        if path.exists() {
            fs::remove_file(path).map_err(|source| AppError::StoreWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    fn lock(&self, path: &Path, mode: LockMode) -> AppResult<IdentityLock> {
        match mode {
            LockMode::Exclusive => IdentityLock::exclusive(path),
            LockMode::Shared => IdentityLock::shared(path),
        }
    }
}

pub trait StoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStoreDirResolver;

impl StoreDirResolver for EnvStoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(STORE_DIR_ENV) {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(DEFAULT_STORE_DIR)
        }
    }
}

pub fn identity_store_path<R: StoreDirResolver>(
    resolver: &R,
    store_dir: Option<&Path>,
    identity: &str,
) -> PathBuf {
    resolver.resolve(store_dir).join(format!("{identity}.json"))
}

/// Encodings of `identity` as plain values, in enrollment order.
pub fn load_enrolled_encodings<S: EnrollmentStore, R: StoreDirResolver>(
    store: &S,
    resolver: &R,
    store_dir: Option<&Path>,
    identity: &str,
) -> AppResult<Vec<FaceEncoding>> {
    crate::faces::enrollment::validate_identity(identity)?;
    let path = identity_store_path(resolver, store_dir, identity);
    let _lock = store.lock(&path, LockMode::Shared)?;
    let entries = store.load(&path)?;
    debug!(
        target: "facevote::store",
        identity,
        count = entries.len(),
        path = %path.display(),
        "loaded enrolled encodings"
    );
    Ok(entries.into_iter().map(|entry| entry.encoding).collect())
}

pub fn read_enrollment_file(path: &Path) -> AppResult<Vec<EnrolledEncoding>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = fs::read(path).map_err(|source| AppError::StoreRead {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&data).map_err(|err| AppError::InvalidStoreFile {
        path: path.to_path_buf(),
        message: format!("invalid enrollment store contents: {err}"),
    })
}

/// Replace the file atomically with owner-only permissions.
pub fn write_enrollment_file(path: &Path, encodings: &[EnrolledEncoding]) -> AppResult<()> {
    let write_error = |source| AppError::StoreWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|source| AppError::StoreWrite {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_error)?;
    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            let serialized = serde_json::to_vec_pretty(encodings)?;
            writer.write_all(&serialized).map_err(write_error)?;
            writer.write_all(b"\n").map_err(write_error)?;
            writer.flush().map_err(write_error)?;
        }
        file.sync_all().map_err(write_error)?;
    }

    let file = tmp.persist(path).map_err(|err| write_error(err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata().map_err(write_error)?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms).map_err(write_error)?;
    }
    #[cfg(not(unix))]
    drop(file);

    debug!(
        target: "facevote::store",
        path = %path.display(),
        count = encodings.len(),
        "enrollment store written"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers; any number may hold it together.
    Shared,
    /// Load-modify-save of enroll and remove.
    Exclusive,
}

/// Advisory `flock(2)` on `<identity>.lock` next to the identity's store
/// file. It is tied to an open file description, so it serialises separate
/// processes as well as threads that each take their own lock. Released on
/// drop.
pub struct IdentityLock {
    held: Option<Flock<File>>,
}

impl std::fmt::Debug for IdentityLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLock")
            .field("held", &self.is_held())
            .finish()
    }
}

impl IdentityLock {
    pub fn unlocked() -> Self {
        Self { held: None }
    }

    pub fn exclusive(store_path: &Path) -> AppResult<Self> {
        let path = lock_path(store_path);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| AppError::StoreWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = open_lock_file(&path).map_err(|source| AppError::StoreWrite {
            path: path.clone(),
            source,
        })?;
        let held = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            AppError::StoreWrite {
                path: path.clone(),
                source: io::Error::from(errno),
            }
        })?;
        debug!(target: "facevote::store", path = %path.display(), "exclusive lock held");
        Ok(Self { held: Some(held) })
    }

    /// Readers that cannot create the lock file (missing store directory,
    /// read-only store) proceed unlocked; writers always replace the store
    /// file atomically, so such a read still sees a whole file.
    pub fn shared(store_path: &Path) -> AppResult<Self> {
        let path = lock_path(store_path);
        let file = match open_lock_file(&path) {
            Ok(file) => file,
            Err(err) if is_unavailable(&err) => match File::open(&path) {
                Ok(file) => file,
                Err(_) => {
                    debug!(
                        target: "facevote::store",
                        path = %path.display(),
                        "lock file unavailable; reading without a lock"
                    );
                    return Ok(Self::unlocked());
                }
            },
            Err(source) => return Err(AppError::StoreRead { path, source }),
        };
        let held = Flock::lock(file, FlockArg::LockShared).map_err(|(_, errno)| {
            AppError::StoreRead {
                path: path.clone(),
                source: io::Error::from(errno),
            }
        })?;
        Ok(Self { held: Some(held) })
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }
}

pub fn lock_path(store_path: &Path) -> PathBuf {
    store_path.with_extension("lock")
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

fn is_unavailable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || err.raw_os_error() == Some(nix::errno::Errno::EROFS as i32)
}
