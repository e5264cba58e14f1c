//! Permission storage
//!
//! Maps a subject identifier to the permission nodes it was granted.
//! Grants may end in `.*` (or be `*`) to cover a whole subtree.

use chrono::{DateTime, Utc};
use lodestone::permission_matches;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Error type for permission store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read permission store: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse permission store: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unsupported permission file version: {0}")]
    UnsupportedVersion(u32),

    #[error("Store is read-only")]
    ReadOnly,
}

/// Permission nodes granted to one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPermissions {
    pub granted: BTreeSet<String>,
    /// When the grants last changed
    pub updated_at: DateTime<Utc>,
}

impl StoredPermissions {
    pub fn new<I, S>(granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: granted.into_iter().map(Into::into).collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty::<String>())
    }

    /// Whether any grant covers `requested`.
    pub fn allows(&self, requested: &str) -> bool {
        self.granted
            .iter()
            .any(|granted| permission_matches(granted, requested))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Trait for permission storage
///
/// Hosts implement this to back subjects with their own persistence.
pub trait PermissionStore: Send + Sync {
    /// Grants for a subject
    fn get(&self, subject: &str) -> Result<Option<StoredPermissions>, StoreError>;

    /// Replace a subject's grants
    fn set(&self, subject: &str, permissions: StoredPermissions) -> Result<(), StoreError>;

    fn remove(&self, subject: &str) -> Result<(), StoreError>;

    /// List every subject with its grants
    fn list(&self) -> Result<Vec<(String, StoredPermissions)>, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Re-read the backing storage.
    ///
    /// Returns true when the contents changed.
    fn reload(&self) -> Result<bool, StoreError> {
        Ok(false)
    }

    /// Add one permission node to a subject's grants
    fn grant(&self, subject: &str, node: &str) -> Result<(), StoreError> {
        let mut permissions = self.get(subject)?.unwrap_or_else(StoredPermissions::empty);
        if permissions.granted.insert(node.to_string()) {
            permissions.touch();
            self.set(subject, permissions)?;
        }
        Ok(())
    }

    /// Remove one permission node from a subject's grants
    fn revoke(&self, subject: &str, node: &str) -> Result<(), StoreError> {
        if let Some(mut permissions) = self.get(subject)? {
            if permissions.granted.remove(node) {
                permissions.touch();
                self.set(subject, permissions)?;
            }
        }
        Ok(())
    }

    /// Whether `subject` holds `requested`
    fn has_permission(&self, subject: &str, requested: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(subject)?
            .is_some_and(|permissions| permissions.allows(requested)))
    }
}

impl<T: PermissionStore + ?Sized> PermissionStore for Arc<T> {
    fn get(&self, subject: &str) -> Result<Option<StoredPermissions>, StoreError> {
        (**self).get(subject)
    }

    fn set(&self, subject: &str, permissions: StoredPermissions) -> Result<(), StoreError> {
        (**self).set(subject, permissions)
    }

    fn remove(&self, subject: &str) -> Result<(), StoreError> {
        (**self).remove(subject)
    }

    fn list(&self) -> Result<Vec<(String, StoredPermissions)>, StoreError> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }

    fn reload(&self) -> Result<bool, StoreError> {
        (**self).reload()
    }
}

// ============================================================================
// File-based Permission Store
// ============================================================================

const FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PermissionFileData {
    version: u32,
    subjects: BTreeMap<String, StoredPermissions>,
}

impl PermissionFileData {
    fn new() -> Self {
        Self {
            version: FILE_VERSION,
            subjects: BTreeMap::new(),
        }
    }

    fn read(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)?;
        let data: Self = serde_json::from_reader(BufReader::new(file))?;
        if data.version != FILE_VERSION {
            return Err(StoreError::UnsupportedVersion(data.version));
        }
        Ok(data)
    }
}

/// File-based permission store
///
/// Keeps grants in a JSON file, by default
/// `~/.config/<app>/permissions.json`. Edits made to the file by hand are
/// picked up by [`PermissionStore::reload`].
pub struct FilePermissionStore {
    path: PathBuf,
    data: RwLock<PermissionFileData>,
}

impl FilePermissionStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = PermissionFileData::read(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        Self::new(default_path(app_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &*data)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut PermissionFileData)) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut data);
        }
        self.save()
    }
}

/// `<config dir>/<app>/permissions.json`
pub fn default_path(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(app_name)
        .join("permissions.json")
}

impl PermissionStore for FilePermissionStore {
    fn get(&self, subject: &str) -> Result<Option<StoredPermissions>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.subjects.get(subject).cloned())
    }

    fn set(&self, subject: &str, permissions: StoredPermissions) -> Result<(), StoreError> {
        self.update(|data| {
            data.subjects.insert(subject.to_string(), permissions);
        })
    }

    fn remove(&self, subject: &str) -> Result<(), StoreError> {
        self.update(|data| {
            data.subjects.remove(subject);
        })
    }

    fn list(&self) -> Result<Vec<(String, StoredPermissions)>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .subjects
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|data| data.subjects.clear())
    }

    fn reload(&self) -> Result<bool, StoreError> {
        let fresh = PermissionFileData::read(&self.path)?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if *data == fresh {
            return Ok(false);
        }
        *data = fresh;
        Ok(true)
    }
}

impl std::fmt::Debug for FilePermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePermissionStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// In-Memory Permission Store
// ============================================================================

/// In-memory permission store for testing or session-only grants
pub struct MemoryPermissionStore {
    data: RwLock<BTreeMap<String, StoredPermissions>>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store pre-populated with `(subject, grants)` pairs
    pub fn with_grants<'a>(grants: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let data = grants
            .into_iter()
            .map(|(subject, nodes)| {
                (
                    subject.to_string(),
                    StoredPermissions::new(nodes.iter().copied()),
                )
            })
            .collect();
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn get(&self, subject: &str) -> Result<Option<StoredPermissions>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(subject).cloned())
    }

    fn set(&self, subject: &str, permissions: StoredPermissions) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(subject.to_string(), permissions);
        Ok(())
    }

    fn remove(&self, subject: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(subject);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, StoredPermissions)>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryPermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPermissionStore")
            .field("count", &self.len())
            .finish()
    }
}

// ============================================================================
// Read-Only Permission Store
// ============================================================================

/// Read-only wrapper for any permission store
///
/// For deployments where grants are provisioned out of band. Reloads still
/// pass through so the file can be edited externally.
pub struct ReadOnlyPermissionStore<S: PermissionStore> {
    inner: S,
}

impl<S: PermissionStore> ReadOnlyPermissionStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: PermissionStore> PermissionStore for ReadOnlyPermissionStore<S> {
    fn get(&self, subject: &str) -> Result<Option<StoredPermissions>, StoreError> {
        self.inner.get(subject)
    }

    fn set(&self, _subject: &str, _permissions: StoredPermissions) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn remove(&self, _subject: &str) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn list(&self) -> Result<Vec<(String, StoredPermissions)>, StoreError> {
        self.inner.list()
    }

    fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn reload(&self) -> Result<bool, StoreError> {
        self.inner.reload()
    }
}

impl<S: PermissionStore + std::fmt::Debug> std::fmt::Debug for ReadOnlyPermissionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyPermissionStore")
            .field("inner", &self.inner)
            .finish()
    }
}
