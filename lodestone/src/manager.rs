//! The command router.
//!
//! [`CommandManager`] owns the alias registry, the registrar catalogue, the
//! canonical tree and the per-client caches, and keeps them consistent:
//! a registration claims its aliases, grafts its nodes into the canonical
//! tree and invalidates every client cache, or does none of these.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lodestone_api::TreePacket;
use tracing::{debug, info, warn};

use crate::alias::{normalize_alias, AliasEntry, AliasRegistry, PluginId};
use crate::canonical::{CanonicalTree, TreeSnapshot};
use crate::cause::CommandCause;
use crate::error::{CommandError, RegistrationError, SyntaxErrorKind};
use crate::node::{CommandNode, NodeBuilder, NodeOrigin};
use crate::reader::floor_boundary;
use crate::registrar::{
    CommandMapping, CommandResult, ManagedCommand, ManagedRegistrar, NativeRegistrar,
    RawCommand, RawRegistrar, Registrar, RegistrarKey,
};
use crate::sync::{ClientId, PermissionCache, SuggestionNode, SuggestionTreeBuilder};

/// One visible command, as listed to a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandListing {
    pub alias: String,
    pub secondary_aliases: Vec<String>,
    pub owner: PluginId,
    pub registrar: RegistrarKey,
}

pub struct CommandManager {
    aliases: AliasRegistry,
    tree: Arc<CanonicalTree>,
    cache: PermissionCache,
    registrars: RwLock<BTreeMap<RegistrarKey, Arc<dyn Registrar>>>,
    mappings: RwLock<BTreeMap<String, CommandMapping>>,
    native: Arc<NativeRegistrar>,
    managed: Arc<ManagedRegistrar>,
    raw: Arc<RawRegistrar>,
    registration: Mutex<()>,
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandManager {
    pub fn new() -> Self {
        let tree = Arc::new(CanonicalTree::new());
        let native = Arc::new(NativeRegistrar::new(tree.clone()));
        let managed = Arc::new(ManagedRegistrar::managed());
        let raw = Arc::new(RawRegistrar::raw());

        let mut registrars: BTreeMap<RegistrarKey, Arc<dyn Registrar>> = BTreeMap::new();
        registrars.insert(RegistrarKey::native(), native.clone());
        registrars.insert(RegistrarKey::managed(), managed.clone());
        registrars.insert(RegistrarKey::raw(), raw.clone());

        Self {
            aliases: AliasRegistry::new(),
            tree,
            cache: PermissionCache::new(),
            registrars: RwLock::new(registrars),
            mappings: RwLock::new(BTreeMap::new()),
            native,
            managed,
            raw,
            registration: Mutex::new(()),
        }
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    pub fn permission_cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree.snapshot()
    }

    pub fn managed_registrar(&self) -> &Arc<ManagedRegistrar> {
        &self.managed
    }

    pub fn raw_registrar(&self) -> &Arc<RawRegistrar> {
        &self.raw
    }

    /// Install a custom registrar under its key.
    pub fn install_registrar(&self, registrar: Arc<dyn Registrar>) -> Result<(), RegistrationError> {
        let mut registrars = self.registrars.write().unwrap_or_else(PoisonError::into_inner);
        let key = registrar.key().clone();
        if registrars.contains_key(&key) {
            return Err(RegistrationError::DuplicateRegistrar(key));
        }
        info!(registrar = %key, "installed registrar");
        registrars.insert(key, registrar);
        Ok(())
    }

    pub fn registrar(&self, key: &RegistrarKey) -> Option<Arc<dyn Registrar>> {
        self.registrars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Register a node built directly with the node builders.
    ///
    /// The builder's literal name is the primary alias.
    pub fn register_native(
        &self,
        owner: &PluginId,
        builder: NodeBuilder,
        secondary: &[&str],
    ) -> Result<CommandMapping, RegistrationError> {
        let _guard = self.lock_registration();
        if !builder.is_literal() {
            return Err(RegistrationError::NotALiteral);
        }
        let primary = normalize_alias(builder.name())?;
        let node = self.native.build(owner, builder.rename(primary.clone()));
        self.publish(self.native.clone(), owner, &primary, secondary, Some(node), || {})
    }

    /// Register a declaratively described command.
    pub fn register_managed(
        &self,
        owner: &PluginId,
        command: ManagedCommand,
        primary: &str,
        secondary: &[&str],
    ) -> Result<CommandMapping, RegistrationError> {
        let _guard = self.lock_registration();
        let builder = self.managed.register(primary, command)?;
        let primary = builder.name().to_string();
        let node = builder.build_with(&self.origin(RegistrarKey::managed(), owner));
        let managed = self.managed.clone();
        let rollback_alias = primary.clone();
        self.publish(self.managed.clone(), owner, &primary, secondary, Some(node), move || {
            managed.forget(&rollback_alias);
        })
    }

    /// Register a command that parses its own arguments.
    pub fn register_raw(
        &self,
        owner: &PluginId,
        command: impl RawCommand + 'static,
        primary: &str,
        secondary: &[&str],
    ) -> Result<CommandMapping, RegistrationError> {
        let _guard = self.lock_registration();
        let builder = self.raw.register(primary, Box::new(command))?;
        let primary = builder.name().to_string();
        let node = builder.build_with(&self.origin(RegistrarKey::raw(), owner));
        let raw = self.raw.clone();
        let rollback_alias = primary.clone();
        self.publish(self.raw.clone(), owner, &primary, secondary, Some(node), move || {
            raw.forget(&rollback_alias);
        })
    }

    /// Route aliases to an installed registrar.
    ///
    /// `node`, when given, is published in the canonical tree so clients can
    /// see and complete the command.
    pub fn register_alias(
        &self,
        registrar: &RegistrarKey,
        owner: &PluginId,
        primary: &str,
        secondary: &[&str],
        node: Option<NodeBuilder>,
    ) -> Result<CommandMapping, RegistrationError> {
        let _guard = self.lock_registration();
        let target = self
            .registrar(registrar)
            .ok_or_else(|| RegistrationError::UnknownRegistrar(registrar.clone()))?;
        let primary = normalize_alias(primary)?;
        let node = node.map(|b| {
            b.rename(primary.clone())
                .build_with(&self.origin(registrar.clone(), owner))
        });
        self.publish(target, owner, &primary, secondary, node, || {})
    }

    fn origin(&self, registrar: RegistrarKey, owner: &PluginId) -> NodeOrigin {
        NodeOrigin {
            registrar,
            owner: owner.clone(),
        }
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, ()> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim aliases, then graft the node, rolling back on any failure.
    fn publish(
        &self,
        registrar: Arc<dyn Registrar>,
        owner: &PluginId,
        primary: &str,
        secondary: &[&str],
        node: Option<CommandNode>,
        rollback: impl FnOnce(),
    ) -> Result<CommandMapping, RegistrationError> {
        let key = registrar.key().clone();
        let mut requested = vec![primary];
        requested.extend_from_slice(secondary);
        let entry = AliasEntry {
            primary: primary.to_string(),
            owner: owner.clone(),
            registrar,
        };
        let claimed = match self.aliases.register_all(&requested, entry) {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(alias = %primary, owner = %owner, error = %e, "registration rejected");
                rollback();
                return Err(e);
            }
        };
        let secondary: Vec<String> = claimed[1..].to_vec();

        if let Some(node) = node {
            let grafted = self.tree.mutate(|d| {
                d.attach(node)?;
                for alias in &secondary {
                    d.add_alias(alias, primary)?;
                }
                Ok(())
            });
            if let Err(e) = grafted {
                let claimed: Vec<&str> = claimed.iter().map(String::as_str).collect();
                self.aliases.unregister_all(&claimed, owner);
                warn!(alias = %primary, error = %e, "failed to publish command node");
                rollback();
                return Err(e);
            }
        }
        self.cache.invalidate_all();

        let mapping = CommandMapping {
            primary_alias: primary.to_string(),
            secondary_aliases: secondary,
            owner: owner.clone(),
            registrar: key,
        };
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mapping.primary_alias.clone(), mapping.clone());
        info!(
            alias = %mapping.primary_alias,
            owner = %mapping.owner,
            registrar = %mapping.registrar,
            "registered command"
        );
        Ok(mapping)
    }

    /// Remove a registration. Returns false when it was not registered.
    pub fn unregister(&self, mapping: &CommandMapping) -> bool {
        let _guard = self.lock_registration();
        if !self.is_registered(mapping) {
            return false;
        }
        let aliases = mapping.all_aliases();
        self.aliases.unregister_all(&aliases, &mapping.owner);
        let primary = mapping.primary_alias.as_str();
        if self.tree.snapshot().dispatcher.find_node(&[primary]).is_some() {
            let removed = self.tree.mutate(|d| Ok(d.remove(primary).is_some()));
            debug!(alias = %primary, removed = ?removed, "removed canonical node");
        }
        if let Some(registrar) = self.registrar(&mapping.registrar) {
            registrar.unregister(mapping);
        }
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(primary);
        self.cache.invalidate_all();
        info!(alias = %primary, owner = %mapping.owner, "unregistered command");
        true
    }

    /// Remove every registration held by `owner`.
    pub fn unregister_owner(&self, owner: &PluginId) -> usize {
        self.mappings_for(owner)
            .iter()
            .filter(|m| self.unregister(m))
            .count()
    }

    pub fn is_registered(&self, mapping: &CommandMapping) -> bool {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&mapping.primary_alias)
            .is_some_and(|m| m == mapping)
    }

    pub fn mapping(&self, alias: &str) -> Option<CommandMapping> {
        let entry = self.aliases.resolve(alias)?;
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry.primary)
            .cloned()
    }

    pub fn mappings_for(&self, owner: &PluginId) -> Vec<CommandMapping> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| &m.owner == owner)
            .cloned()
            .collect()
    }

    /// Whether `cause` can see the command behind `entry`.
    ///
    /// Commands without a canonical node are visible to everyone; their
    /// registrar decides at execution time.
    fn visible(&self, snapshot: &TreeSnapshot, entry: &AliasEntry, cause: &CommandCause) -> bool {
        snapshot
            .dispatcher
            .find_node(&[entry.primary.as_str()])
            .map_or(true, |node| !node.is_hidden() && node.can_use(cause))
    }

    /// Run a command line.
    ///
    /// A leading `/` is ignored. The alias is everything up to the first
    /// space, and the rest of the line reaches the registrar untouched.
    pub fn process(&self, cause: &CommandCause, line: &str) -> Result<CommandResult, CommandError> {
        let line = line.strip_prefix('/').unwrap_or(line);
        let (alias, arguments) = line.split_once(' ').unwrap_or((line, ""));
        let Some(entry) = self.aliases.resolve(alias) else {
            debug!(alias = %alias, "unknown command");
            return Err(SyntaxErrorKind::UnknownCommand.into());
        };
        debug!(
            alias = %entry.primary,
            registrar = %entry.registrar_key(),
            cause = %cause.identifier(),
            "dispatching command"
        );
        entry.registrar.process(cause, &entry.primary, arguments)
    }

    /// Completions for `line` with the cursor at `cursor`.
    ///
    /// Before the first space this completes aliases the cause can see.
    /// After it, the owning registrar completes the arguments.
    pub fn suggest(&self, cause: &CommandCause, line: &str, cursor: usize) -> Vec<String> {
        let line = line.strip_prefix('/').unwrap_or(line);
        let cursor = floor_boundary(line, cursor);
        let line = &line[..cursor];
        match line.split_once(' ') {
            None => {
                let prefix = line.to_lowercase();
                let snapshot = self.tree.snapshot();
                self.aliases
                    .entries()
                    .into_iter()
                    .filter(|(alias, entry)| {
                        alias.starts_with(&prefix) && self.visible(&snapshot, entry, cause)
                    })
                    .map(|(alias, _)| alias)
                    .collect()
            }
            Some((alias, arguments)) => match self.aliases.resolve(alias) {
                Some(entry) => entry.registrar.suggestions(cause, &entry.primary, arguments),
                None => Vec::new(),
            },
        }
    }

    pub fn help(&self, cause: &CommandCause, alias: &str) -> Option<String> {
        let entry = self.aliases.resolve(alias)?;
        if !self.visible(&self.tree.snapshot(), &entry, cause) {
            return None;
        }
        entry.registrar.help(cause, &entry.primary)
    }

    /// Commands `cause` can see, sorted by primary alias.
    pub fn list_commands(&self, cause: &CommandCause) -> Vec<CommandListing> {
        let snapshot = self.tree.snapshot();
        let mappings: Vec<CommandMapping> = self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        mappings
            .into_iter()
            .filter(|m| {
                snapshot
                    .dispatcher
                    .find_node(&[m.primary_alias.as_str()])
                    .map_or(true, |node| !node.is_hidden() && node.can_use(cause))
            })
            .map(|m| CommandListing {
                alias: m.primary_alias,
                secondary_aliases: m.secondary_aliases,
                owner: m.owner,
                registrar: m.registrar,
            })
            .collect()
    }

    /// The pruned tree `client` may see.
    pub fn build_client_tree(&self, client: ClientId, cause: &CommandCause) -> SuggestionNode {
        let snapshot = self.tree.snapshot();
        SuggestionTreeBuilder::new(&self.cache).build(client, cause, &snapshot)
    }

    /// The pruned tree `client` may see, in wire form.
    pub fn client_tree_packet(&self, client: ClientId, cause: &CommandCause) -> TreePacket {
        self.build_client_tree(client, cause).to_packet()
    }

    /// Forget a client's cached state, e.g. after its permissions changed.
    pub fn invalidate_client(&self, client: ClientId) {
        self.cache.invalidate_client(client);
    }

    pub fn disconnect(&self, client: ClientId) {
        self.cache.disconnect(client);
    }
}
