//! Per-client sessions
//!
//! Each connected client gets a worker task fed by a bounded queue, so its
//! commands, completions and tree refreshes run strictly in arrival order.
//! Engine calls are synchronous and run on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lodestone::{ClientId, CommandCause, CommandError, CommandManager, CommandResult};
use lodestone_api::WireError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::audit::{self, AuditEvent, AuditSink};
use crate::permission::{PermissionStore, StoreError, StoredSubject};
use crate::transport::{ClientTransport, TransportError};

/// Queue depth used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown session: {0}")]
    UnknownSession(ClientId),

    #[error("Session {0} has shut down")]
    Closed(ClientId),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Failed to reach client: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode command tree: {0}")]
    Wire(#[from] WireError),

    #[error("Permission store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

enum SessionRequest {
    Execute {
        line: String,
        reply: oneshot::Sender<Result<CommandResult, CommandError>>,
    },
    Suggest {
        line: String,
        cursor: usize,
        reply: oneshot::Sender<Vec<String>>,
    },
    RefreshTree {
        force: bool,
        reply: Option<oneshot::Sender<Result<bool, SessionError>>>,
    },
    PermissionsChanged {
        reply: Option<oneshot::Sender<Result<bool, SessionError>>>,
    },
}

struct SessionHandle {
    subject: String,
    requests: mpsc::Sender<SessionRequest>,
    worker: JoinHandle<()>,
}

struct Shared {
    manager: Arc<CommandManager>,
    store: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditSink>,
    queue_capacity: usize,
    sessions: RwLock<HashMap<ClientId, SessionHandle>>,
    next_client: AtomicU64,
}

/// Connected clients and their workers.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        manager: Arc<CommandManager>,
        store: Arc<dyn PermissionStore>,
        audit: Arc<dyn AuditSink>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                store,
                audit,
                queue_capacity: queue_capacity.max(1),
                sessions: RwLock::new(HashMap::new()),
                next_client: AtomicU64::new(1),
            }),
        }
    }

    pub fn manager(&self) -> &Arc<CommandManager> {
        &self.shared.manager
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.shared.store
    }

    /// Open a session for `subject` and queue its first tree.
    pub async fn connect(&self, subject: &str, transport: Arc<dyn ClientTransport>) -> ClientId {
        let client = ClientId::new(self.shared.next_client.fetch_add(1, Ordering::Relaxed));
        let cause = CommandCause::new(Arc::new(StoredSubject::new(
            subject,
            self.shared.store.clone(),
        )));
        let (requests, receiver) = mpsc::channel(self.shared.queue_capacity);

        let worker = SessionWorker {
            client,
            subject: subject.to_string(),
            cause,
            manager: self.shared.manager.clone(),
            audit: self.shared.audit.clone(),
            transport,
            last_fingerprint: None,
        };
        // First in the queue, so it lands before anything the client asks for
        let _ = requests.try_send(SessionRequest::RefreshTree {
            force: true,
            reply: None,
        });
        let worker = tokio::spawn(worker.run(receiver));

        self.shared.sessions.write().await.insert(
            client,
            SessionHandle {
                subject: subject.to_string(),
                requests,
                worker,
            },
        );
        record(&*self.shared.audit, audit::session_connected(subject, client));
        tracing::info!(%client, subject, "session connected");
        client
    }

    /// Run a command line as the session's subject.
    pub async fn submit(
        &self,
        client: ClientId,
        line: impl Into<String>,
    ) -> Result<CommandResult, SessionError> {
        let line = line.into();
        let outcome = self
            .request(client, |reply| SessionRequest::Execute { line, reply })
            .await?;
        Ok(outcome?)
    }

    pub async fn suggest(
        &self,
        client: ClientId,
        line: impl Into<String>,
        cursor: usize,
    ) -> Result<Vec<String>, SessionError> {
        let line = line.into();
        self.request(client, |reply| SessionRequest::Suggest {
            line,
            cursor,
            reply,
        })
        .await
    }

    /// Rebuild the client's tree and send it if it changed.
    ///
    /// Returns whether a tree was sent.
    pub async fn refresh_tree(&self, client: ClientId) -> Result<bool, SessionError> {
        self.request(client, |reply| SessionRequest::RefreshTree {
            force: false,
            reply: Some(reply),
        })
        .await?
    }

    /// Drop the client's cached verdicts, then refresh its tree.
    pub async fn permissions_changed(&self, client: ClientId) -> Result<bool, SessionError> {
        self.request(client, |reply| SessionRequest::PermissionsChanged { reply: Some(reply) })
            .await?
    }

    /// Refresh every session of `subject` after its grants changed.
    ///
    /// Returns how many sessions were sent a new tree.
    pub async fn subject_changed(&self, subject: &str) -> usize {
        let clients: Vec<ClientId> = self
            .shared
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, handle)| handle.subject == subject)
            .map(|(client, _)| *client)
            .collect();
        self.refresh_all(clients).await
    }

    /// Grant a permission node and push the new tree to the subject's sessions.
    pub async fn grant(&self, subject: &str, node: &str) -> Result<usize, SessionError> {
        self.shared.store.grant(subject, node)?;
        Ok(self.subject_changed(subject).await)
    }

    pub async fn revoke(&self, subject: &str, node: &str) -> Result<usize, SessionError> {
        self.shared.store.revoke(subject, node)?;
        Ok(self.subject_changed(subject).await)
    }

    /// Invalidate and refresh every session, e.g. after the command set or
    /// the whole permission store changed.
    ///
    /// Returns how many sessions were sent a new tree.
    pub async fn resync_all(&self) -> usize {
        let clients = self.sessions().await;
        self.refresh_all(clients).await
    }

    /// Re-read the permission store and resync everyone if it changed.
    ///
    /// Returns `None` when the store was unchanged.
    pub async fn reload_permissions(
        &self,
        source: Option<&Path>,
    ) -> Result<Option<usize>, StoreError> {
        let store = self.shared.store.clone();
        let changed = tokio::task::spawn_blocking(move || store.reload())
            .await
            .map_err(|e| StoreError::ReadError(std::io::Error::other(e)))??;
        if !changed {
            tracing::debug!("permission store unchanged");
            return Ok(None);
        }
        record(&*self.shared.audit, audit::permissions_reloaded(source));
        let refreshed = self.resync_all().await;
        tracing::info!(sessions = refreshed, "permissions reloaded");
        Ok(Some(refreshed))
    }

    async fn refresh_all(&self, clients: Vec<ClientId>) -> usize {
        let mut sent = 0;
        for client in clients {
            match self.permissions_changed(client).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(%client, error = %e, "failed to resync session"),
            }
        }
        sent
    }

    /// Close a session and wait for its worker to finish.
    pub async fn disconnect(&self, client: ClientId) -> Result<(), SessionError> {
        let handle = self
            .shared
            .sessions
            .write()
            .await
            .remove(&client)
            .ok_or(SessionError::UnknownSession(client))?;
        drop(handle.requests);
        handle.worker.await?;
        Ok(())
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let handles: Vec<(ClientId, SessionHandle)> =
            self.shared.sessions.write().await.drain().collect();
        for (client, handle) in handles {
            drop(handle.requests);
            if let Err(e) = handle.worker.await {
                tracing::warn!(%client, error = %e, "session worker did not stop cleanly");
            }
        }
    }

    pub async fn sessions(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> =
            self.shared.sessions.read().await.keys().copied().collect();
        clients.sort();
        clients
    }

    pub async fn subject_of(&self, client: ClientId) -> Option<String> {
        self.shared
            .sessions
            .read()
            .await
            .get(&client)
            .map(|handle| handle.subject.clone())
    }

    pub async fn len(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn request<T>(
        &self,
        client: ClientId,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T, SessionError> {
        let sender = self
            .shared
            .sessions
            .read()
            .await
            .get(&client)
            .map(|handle| handle.requests.clone())
            .ok_or(SessionError::UnknownSession(client))?;
        let (reply, response) = oneshot::channel();
        sender
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed(client))?;
        response.await.map_err(|_| SessionError::Closed(client))
    }
}

fn record(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "failed to record audit event");
    }
}

struct SessionWorker {
    client: ClientId,
    subject: String,
    cause: CommandCause,
    manager: Arc<CommandManager>,
    audit: Arc<dyn AuditSink>,
    transport: Arc<dyn ClientTransport>,
    /// Fingerprint of the last tree sent
    last_fingerprint: Option<String>,
}

impl SessionWorker {
    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                SessionRequest::Execute { line, reply } => {
                    let outcome = self.execute(&line).await;
                    let _ = reply.send(outcome);
                }
                SessionRequest::Suggest {
                    line,
                    cursor,
                    reply,
                } => {
                    let suggestions = self.suggest(line, cursor).await;
                    let _ = reply.send(suggestions);
                }
                SessionRequest::RefreshTree { force, reply } => {
                    let outcome = self.refresh(force).await;
                    self.answer(reply, outcome);
                }
                SessionRequest::PermissionsChanged { reply } => {
                    self.manager.invalidate_client(self.client);
                    record(
                        &*self.audit,
                        audit::permissions_changed(&self.subject, self.client),
                    );
                    let outcome = self.refresh(false).await;
                    self.answer(reply, outcome);
                }
            }
        }

        self.manager.disconnect(self.client);
        record(
            &*self.audit,
            audit::session_disconnected(&self.subject, self.client),
        );
        tracing::info!(client = %self.client, subject = %self.subject, "session closed");
    }

    fn answer(
        &self,
        reply: Option<oneshot::Sender<Result<bool, SessionError>>>,
        outcome: Result<bool, SessionError>,
    ) {
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    tracing::warn!(client = %self.client, error = %e, "tree refresh failed");
                }
            }
        }
    }

    async fn execute(&self, line: &str) -> Result<CommandResult, CommandError> {
        let manager = self.manager.clone();
        let cause = self.cause.clone();
        let owned = line.to_string();
        let outcome = tokio::task::spawn_blocking(move || manager.process(&cause, &owned))
            .await
            .unwrap_or_else(|e| Err(CommandError::internal(e)));

        match &outcome {
            Ok(result) => {
                tracing::debug!(client = %self.client, line, result = result.result(), "command executed");
                record(
                    &*self.audit,
                    audit::command_executed(&self.subject, self.client, line, result.result()),
                );
            }
            Err(e) => {
                let message = e.message();
                tracing::debug!(client = %self.client, line, error = %message, "command failed");
                record(
                    &*self.audit,
                    audit::command_failed(&self.subject, self.client, line, &message),
                );
                if let Err(e) = self.transport.send_message(self.client, &message).await {
                    tracing::warn!(client = %self.client, error = %e, "failed to report command error");
                }
            }
        }
        outcome
    }

    async fn suggest(&self, line: String, cursor: usize) -> Vec<String> {
        let manager = self.manager.clone();
        let cause = self.cause.clone();
        match tokio::task::spawn_blocking(move || manager.suggest(&cause, &line, cursor)).await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                tracing::warn!(client = %self.client, error = %e, "completion task failed");
                Vec::new()
            }
        }
    }

    async fn refresh(&mut self, force: bool) -> Result<bool, SessionError> {
        let manager = self.manager.clone();
        let cause = self.cause.clone();
        let client = self.client;
        let packet =
            tokio::task::spawn_blocking(move || manager.client_tree_packet(client, &cause)).await?;
        let fingerprint = packet.fingerprint()?;
        if !force && self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            tracing::trace!(%client, "command tree unchanged, not resending");
            return Ok(false);
        }

        self.transport.send_tree(client, &packet).await?;
        record(
            &*self.audit,
            audit::tree_synced(&self.subject, client, packet.len(), &fingerprint),
        );
        tracing::debug!(%client, nodes = packet.len(), "sent command tree");
        self.last_fingerprint = Some(fingerprint);
        Ok(true)
    }
}
