//! Registrars own groups of commands and execute them.
//!
//! The router resolves an alias to a registrar and hands it the primary
//! alias and the raw argument string. Three registrars are built in:
//!
//! - [`NativeRegistrar`] for nodes built directly with [`crate::node`]
//!   builders, living in the shared canonical tree
//! - [`ManagedRegistrar`] for commands described by a
//!   [`lodestone_api::CommandSpec`]
//! - [`RawRegistrar`] for commands that parse their own arguments

use std::fmt;

use crate::alias::PluginId;
use crate::cause::CommandCause;
use crate::error::CommandError;

mod managed;
mod native;
mod raw;
mod tree;

pub use managed::{Executor, ManagedCommand, ManagedFactory, ManagedRegistrar};
pub use native::NativeRegistrar;
pub use raw::{RawCommand, RawFactory, RawRegistrar};
pub use tree::{NodeFactory, TreeRegistrar};

/// Namespaced identifier of a registrar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrarKey {
    namespace: String,
    value: String,
}

impl RegistrarKey {
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    pub fn native() -> Self {
        Self::new("lodestone", "native")
    }

    pub fn managed() -> Self {
        Self::new("lodestone", "managed")
    }

    pub fn raw() -> Self {
        Self::new("lodestone", "raw")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for RegistrarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.value)
    }
}

/// Integer outcome of a command. Positive means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandResult(i32);

impl CommandResult {
    pub fn success() -> Self {
        CommandResult(1)
    }

    pub fn empty() -> Self {
        CommandResult(0)
    }

    pub fn of(result: i32) -> Self {
        CommandResult(result)
    }

    pub fn result(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 > 0
    }
}

/// Record of one registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMapping {
    pub primary_alias: String,
    pub secondary_aliases: Vec<String>,
    pub owner: PluginId,
    pub registrar: RegistrarKey,
}

impl CommandMapping {
    /// Primary alias first, then secondaries in registration order.
    pub fn all_aliases(&self) -> Vec<&str> {
        std::iter::once(self.primary_alias.as_str())
            .chain(self.secondary_aliases.iter().map(String::as_str))
            .collect()
    }
}

/// A subsystem that owns and executes a set of commands.
pub trait Registrar: Send + Sync {
    fn key(&self) -> &RegistrarKey;

    /// Run the command registered under the primary `alias`.
    fn process(
        &self,
        cause: &CommandCause,
        alias: &str,
        arguments: &str,
    ) -> Result<CommandResult, CommandError>;

    /// Completions for the argument string of `alias`.
    fn suggestions(&self, cause: &CommandCause, alias: &str, arguments: &str) -> Vec<String>;

    fn help(&self, cause: &CommandCause, alias: &str) -> Option<String>;

    /// Forget the command described by `mapping`.
    fn unregister(&self, mapping: &CommandMapping);
}

/// Reassemble a command line from its alias and argument string.
pub(crate) fn join_command(alias: &str, arguments: &str) -> String {
    if arguments.is_empty() {
        alias.to_string()
    } else {
        format!("{} {}", alias, arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrar_key_display() {
        assert_eq!(RegistrarKey::managed().to_string(), "lodestone:managed");
        assert_ne!(RegistrarKey::native(), RegistrarKey::raw());
    }

    #[test]
    fn test_join_command() {
        assert_eq!(join_command("home", ""), "home");
        assert_eq!(join_command("home", "set base"), "home set base");
    }

    #[test]
    fn test_mapping_aliases() {
        let mapping = CommandMapping {
            primary_alias: "home".into(),
            secondary_aliases: vec!["h".into(), "homes".into()],
            owner: PluginId::new("homes"),
            registrar: RegistrarKey::raw(),
        };
        assert_eq!(mapping.all_aliases(), vec!["home", "h", "homes"]);
    }

    #[test]
    fn test_command_result() {
        assert!(CommandResult::success().is_success());
        assert!(!CommandResult::empty().is_success());
        assert_eq!(CommandResult::of(5).result(), 5);
    }
}
