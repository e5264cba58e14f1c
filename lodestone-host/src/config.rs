//! Host configuration
//!
//! A [`HostConfig`] bundles the permission store, the audit sink and the
//! session settings. Build one with [`HostConfigBuilder`], load one from a
//! JSON settings file, or start from [`HostPresets`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::permission::{
    FilePermissionStore, MemoryPermissionStore, PermissionStore, ReadOnlyPermissionStore,
};
use crate::session::DEFAULT_QUEUE_CAPACITY;
use crate::watcher::WatcherConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Everything a host needs besides the command manager
pub struct HostConfig {
    pub app_name: String,
    pub store: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditSink>,
    /// Per-client request queue depth
    pub queue_capacity: usize,
    /// Permission file to watch for external edits
    pub watch: Option<PathBuf>,
    pub watcher: WatcherConfig,
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("app_name", &self.app_name)
            .field("queue_capacity", &self.queue_capacity)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl HostConfig {
    /// Load from a JSON [`HostSettings`] document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        HostSettings::from_file(path)?.into_config()
    }
}

/// `<config dir>/<app>`
pub fn app_dir(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(app_name)
}

pub struct HostConfigBuilder {
    app_name: Option<String>,
    store: Option<Arc<dyn PermissionStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    queue_capacity: usize,
    watch: bool,
    permissions_file: Option<PathBuf>,
    debounce: Option<Duration>,
}

impl HostConfigBuilder {
    pub fn new() -> Self {
        Self {
            app_name: None,
            store: None,
            audit: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            watch: false,
            permissions_file: None,
            debounce: None,
        }
    }

    /// Application name, used for default paths
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn store(mut self, store: impl PermissionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Use a file store at `path` instead of the default location
    pub fn permissions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.permissions_file = Some(path.into());
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reload the permission file when it changes on disk
    pub fn watch_permissions(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn build(self) -> Result<HostConfig, ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        let app_name = self.app_name.unwrap_or_else(|| "lodestone".to_string());

        let (store, file): (Arc<dyn PermissionStore>, Option<PathBuf>) = match self.store {
            Some(store) => (store, self.permissions_file),
            None => {
                let path = self
                    .permissions_file
                    .unwrap_or_else(|| app_dir(&app_name).join("permissions.json"));
                let store = FilePermissionStore::new(&path)
                    .map_err(|e| ConfigError::StoreInit(e.to_string()))?;
                (Arc::new(store), Some(path))
            }
        };
        let watch = match (self.watch, file) {
            (true, Some(path)) => Some(path),
            (true, None) => {
                return Err(ConfigError::InvalidConfig(
                    "watching permissions needs a permission file".into(),
                ))
            }
            (false, _) => None,
        };

        let mut watcher = WatcherConfig::default();
        if let Some(debounce) = self.debounce {
            watcher.debounce = debounce;
        }

        Ok(HostConfig {
            app_name,
            store,
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            queue_capacity: self.queue_capacity,
            watch,
            watcher,
        })
    }
}

impl Default for HostConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// On-disk host settings
///
/// ```json
/// {
///   "app_name": "survival",
///   "permissions_file": "/srv/survival/permissions.json",
///   "audit_file": "/srv/survival/audit.jsonl",
///   "watch_permissions": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSettings {
    pub app_name: String,
    /// Defaults to `<config dir>/<app>/permissions.json`
    #[serde(default)]
    pub permissions_file: Option<PathBuf>,
    /// No audit trail when absent
    #[serde(default)]
    pub audit_file: Option<PathBuf>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub watch_permissions: bool,
    /// Refuse writes to the permission store
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

impl HostSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn into_config(self) -> Result<HostConfig, ConfigError> {
        let path = self
            .permissions_file
            .unwrap_or_else(|| app_dir(&self.app_name).join("permissions.json"));
        let file_store =
            FilePermissionStore::new(&path).map_err(|e| ConfigError::StoreInit(e.to_string()))?;

        let mut builder = HostConfigBuilder::new()
            .app_name(self.app_name)
            .permissions_file(path)
            .queue_capacity(self.queue_capacity)
            .watch_permissions(self.watch_permissions);
        builder = if self.read_only {
            builder.store(ReadOnlyPermissionStore::new(file_store))
        } else {
            builder.store(file_store)
        };
        if let Some(audit_file) = self.audit_file {
            let sink =
                FileAuditSink::new(audit_file).map_err(|e| ConfigError::AuditInit(e.to_string()))?;
            builder = builder.audit(sink);
        }
        if let Some(ms) = self.debounce_ms {
            builder = builder.debounce(Duration::from_millis(ms));
        }
        builder.build()
    }
}

/// Ready-made configurations
pub struct HostPresets;

impl HostPresets {
    /// Local development
    ///
    /// - Writable file store in the config directory, watched for edits
    /// - JSONL audit log next to it
    pub fn development(app_name: &str) -> Result<HostConfig, ConfigError> {
        let dir = app_dir(app_name);
        let audit = FileAuditSink::new(dir.join("audit.jsonl"))
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;
        HostConfigBuilder::new()
            .app_name(app_name)
            .permissions_file(dir.join("permissions.json"))
            .audit(audit)
            .watch_permissions(true)
            .build()
    }

    /// Production servers
    ///
    /// - Read-only file store, provisioned out of band and watched
    /// - JSONL audit log
    pub fn production(
        app_name: &str,
        permissions_file: Option<PathBuf>,
    ) -> Result<HostConfig, ConfigError> {
        let dir = app_dir(app_name);
        let path = permissions_file.unwrap_or_else(|| dir.join("permissions.json"));
        let store = FilePermissionStore::new(&path)
            .map_err(|e| ConfigError::StoreInit(e.to_string()))?;
        let audit = FileAuditSink::new(dir.join("audit.jsonl"))
            .map_err(|e| ConfigError::AuditInit(e.to_string()))?;
        HostConfigBuilder::new()
            .app_name(app_name)
            .store(ReadOnlyPermissionStore::new(store))
            .permissions_file(path)
            .audit(audit)
            .watch_permissions(true)
            .build()
    }

    /// Tests: in-memory store and audit, nothing touches the disk
    pub fn testing() -> HostConfig {
        HostConfig {
            app_name: "lodestone-test".to_string(),
            store: Arc::new(MemoryPermissionStore::new()),
            audit: Arc::new(MemoryAuditSink::new()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            watch: None,
            watcher: WatcherConfig::default(),
        }
    }
}
