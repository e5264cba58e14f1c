//! Commands that parse their own argument string.

use std::sync::Arc;

use futures::future;
use lodestone_api::ArgKind;
use tracing::debug;

use super::tree::{NodeFactory, TreeRegistrar};
use super::{CommandResult, RegistrarKey};
use crate::cause::CommandCause;
use crate::context::{CommandContext, Key};
use crate::error::{CommandError, RegistrationError};
use crate::node::{argument, literal, NodeBuilder};
use crate::suggestion::{SharedProvider, Suggestions, SuggestionsBuilder};

/// Name of the greedy node that carries a raw command's arguments.
pub const ARGUMENTS: Key<String> = Key::of("arguments");

/// A command receiving its arguments as one unparsed string.
pub trait RawCommand: Send + Sync {
    fn process(&self, cause: &CommandCause, arguments: &str) -> Result<CommandResult, CommandError>;

    /// Completions for the partial argument string.
    fn suggestions(&self, cause: &CommandCause, arguments: &str)
        -> Result<Vec<String>, CommandError>;

    fn can_execute(&self, _cause: &CommandCause) -> bool {
        true
    }

    fn help(&self, _cause: &CommandCause) -> Option<String> {
        None
    }
}

/// Builds `alias <arguments...>` nodes for [`RawCommand`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFactory;

impl NodeFactory for RawFactory {
    type Command = Box<dyn RawCommand>;

    fn create_node(
        &self,
        alias: &str,
        command: &Arc<Box<dyn RawCommand>>,
    ) -> Result<NodeBuilder, RegistrationError> {
        let requirement = command.clone();
        let bare = command.clone();
        let with_arguments = command.clone();
        Ok(literal(alias)
            .requires(move |cause| requirement.can_execute(cause))
            .executes(move |ctx| bare.process(ctx.cause(), "").map(|r| r.result()))
            .then(
                argument(ARGUMENTS.name(), ArgKind::Greedy)
                    .executes(move |ctx| {
                        let arguments = ctx.get_one(&ARGUMENTS).ok().flatten().unwrap_or_default();
                        with_arguments
                            .process(ctx.cause(), &arguments)
                            .map(|r| r.result())
                    })
                    .suggests(raw_provider(command.clone())),
            ))
    }

    fn help(
        &self,
        cause: &CommandCause,
        _alias: &str,
        command: &Box<dyn RawCommand>,
    ) -> Option<String> {
        if !command.can_execute(cause) {
            return None;
        }
        command.help(cause)
    }
}

/// Provider handing the text after the alias to the wrapped command.
///
/// Failures degrade to no suggestions.
fn raw_provider(command: Arc<Box<dyn RawCommand>>) -> SharedProvider {
    Arc::new(move |ctx: &CommandContext, builder: SuggestionsBuilder| {
        let offset = builder
            .input()
            .find(crate::reader::SEPARATOR)
            .map_or(builder.input().len(), |i| i + 1);
        let mut builder = builder.create_offset(offset);
        let arguments = builder.remaining().to_string();
        match command.suggestions(ctx.cause(), &arguments) {
            Ok(list) => {
                for suggestion in list {
                    builder.suggest(suggestion);
                }
                builder.build_future()
            }
            Err(e) => {
                debug!(error = %e, "raw command failed to suggest");
                Box::pin(future::ready(Suggestions::empty()))
            }
        }
    })
}

/// Registrar for commands with self-parsed arguments.
pub type RawRegistrar = TreeRegistrar<RawFactory>;

impl RawRegistrar {
    pub fn raw() -> Self {
        TreeRegistrar::new(RegistrarKey::raw(), RawFactory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::Registrar;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<String>>,
        locked: bool,
        fail_suggestions: bool,
    }

    impl RawCommand for Echo {
        fn process(&self, _cause: &CommandCause, arguments: &str) -> Result<CommandResult, CommandError> {
            self.seen.lock().unwrap().push(arguments.to_string());
            Ok(CommandResult::success())
        }

        fn suggestions(
            &self,
            _cause: &CommandCause,
            arguments: &str,
        ) -> Result<Vec<String>, CommandError> {
            if self.fail_suggestions {
                return Err(CommandError::failed("no suggestions today"));
            }
            Ok(vec![format!("{}!", arguments)])
        }

        fn can_execute(&self, _cause: &CommandCause) -> bool {
            !self.locked
        }

        fn help(&self, _cause: &CommandCause) -> Option<String> {
            Some("Echo the arguments".into())
        }
    }

    fn register(echo: Echo) -> RawRegistrar {
        let registrar = RawRegistrar::raw();
        registrar.register("echo", Box::new(echo)).unwrap();
        registrar
    }

    #[test]
    fn test_arguments_pass_verbatim() {
        let registrar = RawRegistrar::raw();
        let echo = Arc::new(Echo::default());
        struct Shared(Arc<Echo>);
        impl RawCommand for Shared {
            fn process(&self, c: &CommandCause, a: &str) -> Result<CommandResult, CommandError> {
                self.0.process(c, a)
            }
            fn suggestions(&self, c: &CommandCause, a: &str) -> Result<Vec<String>, CommandError> {
                self.0.suggestions(c, a)
            }
        }
        registrar
            .register("echo", Box::new(Shared(echo.clone())))
            .unwrap();
        let cause = CommandCause::console();
        registrar.process(&cause, "echo", "set  base \"x\"").unwrap();
        registrar.process(&cause, "echo", "").unwrap();
        assert_eq!(*echo.seen.lock().unwrap(), vec!["set  base \"x\"", ""]);
    }

    #[test]
    fn test_suggestions_see_text_after_alias() {
        let registrar = register(Echo::default());
        let cause = CommandCause::console();
        assert_eq!(registrar.suggestions(&cause, "echo", "set b"), vec!["set b!"]);
    }

    #[test]
    fn test_suggestion_failure_degrades() {
        let registrar = register(Echo {
            fail_suggestions: true,
            ..Default::default()
        });
        assert!(registrar
            .suggestions(&CommandCause::console(), "echo", "x")
            .is_empty());
    }

    #[test]
    fn test_can_execute_gates_everything() {
        let registrar = register(Echo {
            locked: true,
            ..Default::default()
        });
        let cause = CommandCause::console();
        assert!(registrar.process(&cause, "echo", "hi").is_err());
        assert!(registrar.help(&cause, "echo").is_none());
    }

    #[test]
    fn test_node_is_complex() {
        let registrar = register(Echo::default());
        let dispatcher = registrar.dispatcher();
        let echo = dispatcher.find_node(&["echo"]).unwrap();
        assert!(echo.is_executable());
        assert!(echo.child("arguments").unwrap().is_complex());
        assert_eq!(
            registrar.help(&CommandCause::console(), "echo").as_deref(),
            Some("Echo the arguments")
        );
    }
}
