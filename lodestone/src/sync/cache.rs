use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::SuggestionNode;
use crate::cause::CommandCause;
use crate::node::{CommandNode, NodeId};

/// Identity of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        ClientId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Everything remembered about one client for one tree generation.
#[derive(Default)]
pub(crate) struct ClientSuggestionState {
    generation: u64,
    permissions: HashMap<NodeId, bool>,
    /// Materialized form of a canonical node; `None` when it was pruned.
    pub(crate) resolved: HashMap<NodeId, Option<Arc<SuggestionNode>>>,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub permission_checks: u64,
    pub permission_hits: u64,
    pub subtree_reuses: u64,
}

/// Per-client permission verdicts and materialized subtrees.
///
/// Entries are tagged with the canonical tree generation they were computed
/// against and are discarded on first access under a newer one.
#[derive(Default)]
pub struct PermissionCache {
    clients: Mutex<HashMap<ClientId, Arc<Mutex<ClientSuggestionState>>>>,
    permission_checks: AtomicU64,
    permission_hits: AtomicU64,
    subtree_reuses: AtomicU64,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `client`, reset when it belongs to another generation.
    pub(crate) fn state(&self, client: ClientId, generation: u64) -> Arc<Mutex<ClientSuggestionState>> {
        let state = {
            let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
            clients.entry(client).or_default().clone()
        };
        {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.generation != generation {
                *guard = ClientSuggestionState {
                    generation,
                    ..Default::default()
                };
            }
        }
        state
    }

    /// Whether `cause` may use `node`, evaluated at most once per client and
    /// generation.
    pub fn can_use(
        &self,
        client: ClientId,
        generation: u64,
        node: &CommandNode,
        cause: &CommandCause,
    ) -> bool {
        let state = self.state(client, generation);
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        self.check(&mut guard, node, cause)
    }

    pub(crate) fn check(
        &self,
        state: &mut ClientSuggestionState,
        node: &CommandNode,
        cause: &CommandCause,
    ) -> bool {
        if let Some(&verdict) = state.permissions.get(&node.id()) {
            self.permission_hits.fetch_add(1, Ordering::Relaxed);
            return verdict;
        }
        self.permission_checks.fetch_add(1, Ordering::Relaxed);
        let verdict = node.can_use(cause);
        state.permissions.insert(node.id(), verdict);
        verdict
    }

    pub(crate) fn record_reuse(&self) {
        self.subtree_reuses.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget everything about every client.
    pub fn invalidate_all(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if !clients.is_empty() {
            debug!(clients = clients.len(), "invalidated suggestion caches");
        }
        clients.clear();
    }

    /// Forget everything about one client, e.g. after its permissions changed.
    pub fn invalidate_client(&self, client: ClientId) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&client)
            .is_some()
    }

    /// Drop a disconnected client's entry.
    pub fn disconnect(&self, client: ClientId) -> bool {
        let removed = self.invalidate_client(client);
        debug!(%client, removed, "client suggestion cache released");
        removed
    }

    pub fn is_tracking(&self, client: ClientId) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&client)
    }

    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            permission_hits: self.permission_hits.load(Ordering::Relaxed),
            subtree_reuses: self.subtree_reuses.load(Ordering::Relaxed),
        }
    }
}
