use std::sync::Arc;

use futures::executor::block_on;
use tracing::debug;

use super::{join_command, CommandMapping, CommandResult, Registrar, RegistrarKey};
use crate::alias::PluginId;
use crate::canonical::CanonicalTree;
use crate::cause::CommandCause;
use crate::error::CommandError;
use crate::node::{CommandNode, NodeBuilder, NodeOrigin};

/// Registrar for nodes built directly against the canonical tree.
///
/// Native commands have no private tree: they execute and complete against
/// the shared one. Every node they create is stamped with its origin.
pub struct NativeRegistrar {
    key: RegistrarKey,
    tree: Arc<CanonicalTree>,
}

impl NativeRegistrar {
    pub(crate) fn new(tree: Arc<CanonicalTree>) -> Self {
        Self {
            key: RegistrarKey::native(),
            tree,
        }
    }

    /// Build `builder`, recording `owner` on every node.
    pub(crate) fn build(&self, owner: &PluginId, builder: NodeBuilder) -> CommandNode {
        builder.build_with(&NodeOrigin {
            registrar: self.key.clone(),
            owner: owner.clone(),
        })
    }
}

impl Registrar for NativeRegistrar {
    fn key(&self) -> &RegistrarKey {
        &self.key
    }

    fn process(
        &self,
        cause: &CommandCause,
        alias: &str,
        arguments: &str,
    ) -> Result<CommandResult, CommandError> {
        let snapshot = self.tree.snapshot();
        snapshot
            .dispatcher
            .execute(&join_command(alias, arguments), cause)
            .map(CommandResult::of)
    }

    fn suggestions(&self, cause: &CommandCause, alias: &str, arguments: &str) -> Vec<String> {
        let dispatcher = self.tree.snapshot().dispatcher;
        let line = format!("{} {}", alias, arguments);
        let parse = dispatcher.parse(&line, cause);
        block_on(dispatcher.completions(&parse)).texts()
    }

    fn help(&self, cause: &CommandCause, alias: &str) -> Option<String> {
        let dispatcher = self.tree.snapshot().dispatcher;
        let node = dispatcher.find_node(&[alias])?;
        if !node.can_use(cause) {
            return None;
        }
        let mut lines = Vec::new();
        if node.is_executable() {
            lines.push(alias.to_string());
        }
        for (_, usage) in dispatcher.smart_usage(node, cause) {
            lines.push(format!("{} {}", alias, usage));
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn unregister(&self, mapping: &CommandMapping) {
        let primary = mapping.primary_alias.as_str();
        if self.tree.snapshot().dispatcher.find_node(&[primary]).is_none() {
            return;
        }
        let removed = self.tree.mutate(|d| Ok(d.remove(primary).is_some()));
        debug!(alias = %primary, removed = ?removed, "removed native command");
    }
}
