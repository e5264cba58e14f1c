use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::executor::block_on;
use tracing::debug;

use super::{join_command, CommandMapping, CommandResult, Registrar, RegistrarKey};
use crate::alias::normalize_alias;
use crate::cause::CommandCause;
use crate::dispatcher::Dispatcher;
use crate::error::{CommandError, RegistrationError};
use crate::node::NodeBuilder;

/// Turns a registrar's command objects into command nodes.
pub trait NodeFactory: Send + Sync + 'static {
    type Command: Send + Sync + 'static;

    /// Node tree for `command` under the literal `alias`.
    fn create_node(
        &self,
        alias: &str,
        command: &Arc<Self::Command>,
    ) -> Result<NodeBuilder, RegistrationError>;

    fn help(&self, cause: &CommandCause, alias: &str, command: &Self::Command) -> Option<String>;
}

struct TreeState<C> {
    dispatcher: Dispatcher,
    commands: BTreeMap<String, Arc<C>>,
}

/// Registrar that keeps its commands in a private tree.
///
/// Execution and completion run against that tree. The same node shape is
/// handed back on registration so the router can graft it into the
/// canonical tree.
pub struct TreeRegistrar<F: NodeFactory> {
    key: RegistrarKey,
    factory: F,
    state: RwLock<TreeState<F::Command>>,
}

impl<F: NodeFactory> TreeRegistrar<F> {
    pub fn new(key: RegistrarKey, factory: F) -> Self {
        Self {
            key,
            factory,
            state: RwLock::new(TreeState {
                dispatcher: Dispatcher::new(),
                commands: BTreeMap::new(),
            }),
        }
    }

    /// Add `command` under `primary`, returning the node shape to publish.
    ///
    /// Fails before anything is recorded when the registrar already holds
    /// the alias.
    pub(crate) fn register(
        &self,
        primary: &str,
        command: F::Command,
    ) -> Result<NodeBuilder, RegistrationError> {
        let primary = normalize_alias(primary)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.commands.contains_key(&primary) {
            return Err(RegistrationError::DuplicatePrimaryAlias(primary));
        }
        let command = Arc::new(command);
        let builder = self.factory.create_node(&primary, &command)?;
        state.dispatcher.attach(builder.clone().build())?;
        state.commands.insert(primary.clone(), command);
        debug!(registrar = %self.key, alias = %primary, "registered command");
        Ok(builder)
    }

    /// Drop `primary` from the private tree.
    pub(crate) fn forget(&self, primary: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let key = primary.to_lowercase();
        state.dispatcher.remove(&key);
        state.commands.remove(&key).is_some()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.read(|state| state.commands.contains_key(&alias.to_lowercase()))
    }

    /// Primary aliases held by this registrar, sorted.
    pub fn commands(&self) -> Vec<String> {
        self.read(|state| state.commands.keys().cloned().collect())
    }

    /// Snapshot of the private tree.
    pub fn dispatcher(&self) -> Dispatcher {
        self.read(|state| state.dispatcher.clone())
    }

    fn read<R>(&self, f: impl FnOnce(&TreeState<F::Command>) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl<F: NodeFactory> Registrar for TreeRegistrar<F> {
    fn key(&self) -> &RegistrarKey {
        &self.key
    }

    fn process(
        &self,
        cause: &CommandCause,
        alias: &str,
        arguments: &str,
    ) -> Result<CommandResult, CommandError> {
        let dispatcher = self.dispatcher();
        dispatcher
            .execute(&join_command(alias, arguments), cause)
            .map(CommandResult::of)
    }

    fn suggestions(&self, cause: &CommandCause, alias: &str, arguments: &str) -> Vec<String> {
        let dispatcher = self.dispatcher();
        let line = format!("{} {}", alias, arguments);
        let parse = dispatcher.parse(&line, cause);
        block_on(dispatcher.completions(&parse)).texts()
    }

    fn help(&self, cause: &CommandCause, alias: &str) -> Option<String> {
        let command = self.read(|state| state.commands.get(&alias.to_lowercase()).cloned())?;
        self.factory.help(cause, alias, &command)
    }

    fn unregister(&self, mapping: &CommandMapping) {
        self.forget(&mapping.primary_alias);
    }
}
