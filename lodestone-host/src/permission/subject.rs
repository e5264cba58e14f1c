use std::sync::Arc;

use lodestone::Subject;

use super::store::PermissionStore;

/// A subject whose grants live in a [`PermissionStore`].
///
/// Every check reads the store, so grants changed on disk apply as soon as
/// the client's permission cache is invalidated.
pub struct StoredSubject {
    identifier: String,
    store: Arc<dyn PermissionStore>,
}

impl StoredSubject {
    pub fn new(identifier: impl Into<String>, store: Arc<dyn PermissionStore>) -> Self {
        Self {
            identifier: identifier.into(),
            store,
        }
    }
}

impl Subject for StoredSubject {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn has_permission(&self, permission: &str) -> bool {
        match self.store.has_permission(&self.identifier, permission) {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(
                    subject = %self.identifier,
                    permission,
                    error = %e,
                    "permission lookup failed, denying"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for StoredSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSubject")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::MemoryPermissionStore;
    use lodestone::CommandCause;

    #[test]
    fn test_reads_through_to_store() {
        let store = Arc::new(MemoryPermissionStore::new());
        let subject = StoredSubject::new("alice", store.clone());
        assert!(!subject.has_permission("homes.use"));

        store.grant("alice", "homes.*").unwrap();
        assert!(subject.has_permission("homes.use"));

        let cause = CommandCause::new(Arc::new(subject));
        assert_eq!(cause.identifier(), "alice");
        assert!(cause.has_permission("homes.delete"));
    }
}
