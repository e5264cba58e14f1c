//! Alias ownership.
//!
//! Every alias in the system is held by exactly one owner and routes to
//! exactly one registrar. Claims are atomic: of two racing claims for the
//! same alias, one wins and the other observes the winner.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::RegistrationError;
use crate::registrar::{Registrar, RegistrarKey};

/// Identity of the plugin or subsystem that owns a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(Arc<str>);

impl PluginId {
    pub fn new(id: impl AsRef<str>) -> Self {
        PluginId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an alias resolves to.
#[derive(Clone)]
pub struct AliasEntry {
    /// Primary alias of the command the alias belongs to.
    pub primary: String,
    pub owner: PluginId,
    pub registrar: Arc<dyn Registrar>,
}

impl AliasEntry {
    pub fn registrar_key(&self) -> &RegistrarKey {
        self.registrar.key()
    }
}

impl fmt::Debug for AliasEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasEntry")
            .field("primary", &self.primary)
            .field("owner", &self.owner)
            .field("registrar", self.registrar.key())
            .finish()
    }
}

/// Lower-case an alias and reject empty or whitespace-bearing ones.
pub fn normalize_alias(alias: &str) -> Result<String, RegistrationError> {
    let trimmed = alias.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidAlias(alias.to_string()));
    }
    Ok(trimmed.to_lowercase())
}

/// Concurrent map from alias to owning registration.
#[derive(Default)]
pub struct AliasRegistry {
    entries: RwLock<HashMap<String, AliasEntry>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim one alias. Fails if anyone already holds it.
    pub fn register(&self, alias: &str, entry: AliasEntry) -> Result<String, RegistrationError> {
        let mut claimed = self.register_all(&[alias], entry)?;
        Ok(claimed.remove(0))
    }

    /// Claim every alias or none.
    pub fn register_all(
        &self,
        aliases: &[&str],
        entry: AliasEntry,
    ) -> Result<Vec<String>, RegistrationError> {
        let normalized = aliases
            .iter()
            .map(|a| normalize_alias(a))
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (index, alias) in normalized.iter().enumerate() {
            if let Some(existing) = entries.get(alias) {
                return Err(RegistrationError::AliasCollision {
                    alias: alias.clone(),
                    owner: existing.owner.clone(),
                });
            }
            if normalized[..index].contains(alias) {
                return Err(RegistrationError::AliasCollision {
                    alias: alias.clone(),
                    owner: entry.owner.clone(),
                });
            }
        }
        for alias in &normalized {
            entries.insert(alias.clone(), entry.clone());
        }
        debug!(aliases = ?normalized, owner = %entry.owner, "claimed aliases");
        Ok(normalized)
    }

    /// Case-insensitive lookup.
    pub fn resolve(&self, alias: &str) -> Option<AliasEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&alias.trim().to_lowercase()).cloned()
    }

    pub fn owner_of(&self, alias: &str) -> Option<PluginId> {
        self.resolve(alias).map(|e| e.owner)
    }

    /// Release an alias. Only its owner may release it.
    pub fn unregister(&self, alias: &str, owner: &PluginId) -> bool {
        self.unregister_all(&[alias], owner) == 1
    }

    /// Release every listed alias held by `owner`, returning how many were
    /// released.
    pub fn unregister_all(&self, aliases: &[&str], owner: &PluginId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0;
        for alias in aliases {
            let key = alias.trim().to_lowercase();
            if entries.get(&key).is_some_and(|e| &e.owner == owner) {
                entries.remove(&key);
                released += 1;
            }
        }
        released
    }

    /// Every alias, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut aliases: Vec<String> = entries.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Every alias with its entry, sorted by alias.
    pub fn entries(&self) -> Vec<(String, AliasEntry)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<(String, AliasEntry)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
