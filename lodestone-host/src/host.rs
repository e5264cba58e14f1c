use std::sync::Arc;

use lodestone::CommandManager;
use thiserror::Error;

use crate::config::{ConfigError, HostConfig};
use crate::session::SessionManager;
use crate::watcher::{PermissionWatcher, WatcherError};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

/// A running host: sessions over a command manager, plus the permission
/// watcher when one is configured.
pub struct Host {
    app_name: String,
    sessions: SessionManager,
    watcher: Option<PermissionWatcher>,
}

impl Host {
    /// Must be called from within a tokio runtime.
    pub async fn start(manager: Arc<CommandManager>, config: HostConfig) -> Result<Self, HostError> {
        let sessions = SessionManager::new(
            manager,
            config.store,
            config.audit,
            config.queue_capacity,
        );
        let watcher = match config.watch {
            Some(path) => Some(PermissionWatcher::new(path, sessions.clone(), config.watcher).await?),
            None => None,
        };
        tracing::info!(app = %config.app_name, watching = watcher.is_some(), "host started");
        Ok(Self {
            app_name: config.app_name,
            sessions,
            watcher,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn manager(&self) -> &Arc<CommandManager> {
        self.sessions.manager()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn watcher(&self) -> Option<&PermissionWatcher> {
        self.watcher.as_ref()
    }

    /// Push fresh trees after commands were registered or removed.
    ///
    /// Returns how many clients received a new tree.
    pub async fn commands_changed(&self) -> usize {
        self.sessions.resync_all().await
    }

    /// Stop the watcher and close every session.
    pub async fn shutdown(self) {
        if let Some(watcher) = self.watcher {
            watcher.shutdown().await;
        }
        self.sessions.shutdown().await;
        tracing::info!(app = %self.app_name, "host stopped");
    }
}
