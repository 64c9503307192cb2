//! JSON file storage backend
//!
//! Stores every credential and its ranges in a single JSON document in the
//! data directory. Several stores, in this process or in others, may share a
//! directory: every operation holds an advisory lock on `restrictions.lock`
//! and works from a fresh read of the file, so writers never overwrite each
//! other's changes. Writes replace the file atomically.
//!
//! File I/O inside the lock is synchronous, so no lock is ever held across
//! an `.await`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RangeEdit, RestrictionStore};
use crate::credential::{AllowedRange, Credential, StoredCredential};
use crate::error::{GuardError, Result};

/// Current on-disk format version
const FILE_VERSION: u32 = 1;

const STORAGE_FILE: &str = "restrictions.json";
const LOCK_FILE: &str = "restrictions.lock";

type Credentials = BTreeMap<String, StoredCredential>;

/// JSON file storage backend
pub struct JsonFileStore {
    /// Directory for storage files
    storage_dir: PathBuf,
}

/// File format for persistent storage
#[derive(Debug, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    credentials: Credentials,
}

/// Advisory lock on the storage directory, released on drop
///
/// The lock file itself is never removed: another process may already hold
/// an open handle to it.
struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Block until no other reader or writer holds the lock
    fn exclusive(dir: &Path) -> Result<Self> {
        let file = Self::open(dir)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    /// Block until no writer holds the lock
    fn shared(dir: &Path) -> Result<Self> {
        let file = Self::open(dir)?;
        FileExt::lock_shared(&file)?;
        Ok(Self { file })
    }

    fn open(dir: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        Ok(file)
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl JsonFileStore {
    /// Create a store in the default data directory
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_dir()?)
    }

    /// Create with a custom storage directory
    pub fn with_dir(storage_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&storage_dir)?;

        debug!("JSON file storage initialized at: {:?}", storage_dir);

        Ok(Self { storage_dir })
    }

    /// Create a store in `storage_dir` and check that any existing data
    /// can be read
    pub fn open(storage_dir: PathBuf) -> Result<Self> {
        let store = Self::with_dir(storage_dir)?;
        let count = store.read(|credentials| credentials.len())?;
        debug!("Opened storage with {} credentials", count);
        Ok(store)
    }

    /// Get the default data directory
    pub fn default_dir() -> Result<PathBuf> {
        ProjectDirs::from("org", "tokenguard", "tokenguard")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| GuardError::StorageError("Could not determine data directory".to_string()))
    }

    /// Get the path to the storage file
    fn storage_file_path(&self) -> PathBuf {
        self.storage_dir.join(STORAGE_FILE)
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Read the current file contents. Caller holds the lock.
    fn load(&self) -> Result<Credentials> {
        let path = self.storage_file_path();

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No existing storage file found");
                return Ok(Credentials::new());
            }
            Err(e) => return Err(e.into()),
        };
        let file: StorageFile = serde_json::from_str(&contents)?;

        if file.version != FILE_VERSION {
            return Err(GuardError::StorageError(format!(
                "Unsupported storage file version {} in {}",
                file.version,
                path.display()
            )));
        }

        Ok(file.credentials)
    }

    /// Replace the file contents. Caller holds the exclusive lock.
    fn persist(&self, credentials: Credentials) -> Result<()> {
        let count = credentials.len();
        let file = StorageFile {
            version: FILE_VERSION,
            credentials,
        };

        let contents = serde_json::to_string_pretty(&file)?;
        let path = self.storage_file_path();

        // Write atomically using a temp file
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &contents)?;
        std::fs::rename(&temp_path, &path)?;

        debug!("Saved {} credentials to storage", count);
        Ok(())
    }

    /// Run `f` against a consistent snapshot of the file
    fn read<T>(&self, f: impl FnOnce(&Credentials) -> T) -> Result<T> {
        let _lock = StoreLock::shared(&self.storage_dir)?;
        let credentials = self.load()?;
        Ok(f(&credentials))
    }

    /// Load, change and write back the file while holding the exclusive lock
    ///
    /// `f` returns its result and whether anything changed. The file is left
    /// untouched when `f` fails, reports no change, or the write fails.
    fn modify<T>(&self, f: impl FnOnce(&mut Credentials) -> Result<(T, bool)>) -> Result<T> {
        let _lock = StoreLock::exclusive(&self.storage_dir)?;
        let mut credentials = self.load()?;

        let (value, changed) = f(&mut credentials)?;
        if changed {
            self.persist(credentials)?;
        }

        Ok(value)
    }
}

#[async_trait]
impl RestrictionStore for JsonFileStore {
    async fn get_credential(&self, key: &str) -> Result<Option<Credential>> {
        self.read(|credentials| credentials.get(key).map(|stored| stored.credential.clone()))
    }

    async fn insert_credential(&self, credential: &Credential, ranges: Vec<AllowedRange>) -> Result<()> {
        self.modify(|credentials| {
            if credentials.contains_key(&credential.key) {
                return Err(GuardError::CredentialExists(credential.key.clone()));
            }

            credentials.insert(
                credential.key.clone(),
                StoredCredential {
                    credential: credential.clone(),
                    ranges,
                },
            );
            Ok(((), true))
        })
    }

    async fn delete_credential(&self, key: &str) -> Result<Option<Credential>> {
        let removed = self.modify(|credentials| {
            let removed = credentials.remove(key).map(|stored| stored.credential);
            let changed = removed.is_some();
            Ok((removed, changed))
        })?;

        if removed.is_some() {
            debug!("Deleted credential entry");
        }
        Ok(removed)
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>> {
        self.read(|credentials| {
            credentials
                .values()
                .map(|stored| stored.credential.clone())
                .collect()
        })
    }

    async fn ranges(&self, key: &str) -> Result<Vec<AllowedRange>> {
        self.read(|credentials| {
            credentials
                .get(key)
                .map(|stored| stored.ranges.clone())
                .unwrap_or_default()
        })
    }

    async fn replace_ranges(&self, key: &str, ranges: Vec<AllowedRange>) -> Result<()> {
        self.modify(|credentials| {
            let stored = credentials
                .get_mut(key)
                .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))?;
            stored.ranges = ranges;
            Ok(((), true))
        })
    }

    async fn update_ranges(&self, key: &str, edit: RangeEdit<'_>) -> Result<()> {
        self.modify(|credentials| {
            let stored = credentials
                .get_mut(key)
                .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))?;

            let mut ranges = stored.ranges.clone();
            let changed = edit(&mut ranges);
            if changed {
                stored.ranges = ranges;
            }
            Ok(((), changed))
        })
    }

    fn backend_name(&self) -> &'static str {
        "JSON File Storage"
    }
}
