//! Permission file watcher
//!
//! Watches the permission file and, once edits settle, reloads the store
//! and resyncs every session so clients see their new command trees.

use crate::session::SessionManager;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a burst of file events triggers a reload
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

pub struct PermissionWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl PermissionWatcher {
    /// Start watching `path`.
    ///
    /// The parent directory is watched rather than the file itself, so
    /// editors that replace the file on save are still noticed. It is
    /// created if missing.
    pub async fn new(
        path: impl AsRef<Path>,
        sessions: SessionManager,
        config: WatcherConfig,
    ) -> Result<Self, WatcherError> {
        let path = path.as_ref().to_path_buf();
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&directory).map_err(|e| {
            WatcherError::Io(format!(
                "Failed to create directory {}: {}",
                directory.display(),
                e
            ))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| WatcherError::Io(format!("Not a file path: {}", path.display())))?;

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        })
        .map_err(WatcherError::WatcherInit)?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(WatcherError::WatcherInit)?;
        tracing::info!(path = %path.display(), "watching permission file");

        let watched = path.clone();
        let debounce = config.debounce;
        tokio::spawn(async move {
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("permission watcher shutting down");
                        break;
                    }

                    Some(event) = event_rx.recv() => {
                        let relevant = event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                        if relevant {
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                    }

                    _ = async {
                        match deadline {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        deadline = None;
                        match sessions.reload_permissions(Some(&watched)).await {
                            Ok(Some(refreshed)) => {
                                tracing::info!(path = %watched.display(), sessions = refreshed, "applied permission changes");
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::warn!(path = %watched.display(), error = %e, "failed to reload permissions");
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            path,
            _watcher: watcher,
            shutdown_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("IO error: {0}")]
    Io(String),
}
