//! Commands described declaratively by a [`CommandSpec`].

use std::collections::HashMap;
use std::sync::Arc;

use lodestone_api::{render_help, CommandSpec, SuggestionMode};

use super::tree::{NodeFactory, TreeRegistrar};
use super::CommandResult;
use crate::argument::ArgumentValue;
use crate::cause::CommandCause;
use crate::context::CommandContext;
use crate::error::{CommandError, RegistrationError};
use crate::node::{argument, literal, Command, NodeBuilder, Requirement};
use crate::suggestion::{kind_provider, SharedProvider};

/// Handler for one command or subcommand path.
pub type Executor =
    Arc<dyn Fn(&CommandContext) -> Result<CommandResult, CommandError> + Send + Sync>;

/// A [`CommandSpec`] with the handlers and providers that bring it to life.
pub struct ManagedCommand {
    spec: CommandSpec,
    executors: HashMap<Vec<String>, Executor>,
    providers: HashMap<String, SharedProvider>,
    requirement: Option<Requirement>,
}

impl ManagedCommand {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            executors: HashMap::new(),
            providers: HashMap::new(),
            requirement: None,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Handler for the top-level command.
    pub fn executor<F>(self, executor: F) -> Self
    where
        F: Fn(&CommandContext) -> Result<CommandResult, CommandError> + Send + Sync + 'static,
    {
        self.subcommand_executor(&[], executor)
    }

    /// Handler for the subcommand reached by `path`, e.g. `["set"]`.
    pub fn subcommand_executor<F>(mut self, path: &[&str], executor: F) -> Self
    where
        F: Fn(&CommandContext) -> Result<CommandResult, CommandError> + Send + Sync + 'static,
    {
        let path = path.iter().map(|s| s.to_lowercase()).collect();
        self.executors.insert(path, Arc::new(executor));
        self
    }

    /// Completion provider for every parameter named `arg`.
    pub fn suggestions(mut self, arg: impl Into<String>, provider: SharedProvider) -> Self {
        self.providers.insert(arg.into(), provider);
        self
    }

    /// Extra predicate on top of the declared permission.
    pub fn requires<F>(mut self, requirement: F) -> Self
    where
        F: Fn(&CommandCause) -> bool + Send + Sync + 'static,
    {
        self.requirement = Some(Arc::new(requirement));
        self
    }

    fn level_node(
        &self,
        spec: &CommandSpec,
        name: &str,
        path: &[String],
    ) -> Result<NodeBuilder, RegistrationError> {
        let defaults = spec
            .args
            .iter()
            .filter_map(|arg| arg.default_value.as_ref().map(|v| (arg, v)))
            .map(|(arg, value)| {
                ArgumentValue::parse_str(&arg.kind, value)
                    .map(|parsed| (arg.name.clone(), parsed))
                    .map_err(|e| RegistrationError::InvalidDefault {
                        arg: arg.name.clone(),
                        value: value.clone(),
                        reason: e.kind().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let defaults = Arc::new(defaults);

        let executor = self.executors.get(path).cloned();
        let wrap = |executor: &Executor| -> Command {
            let executor = executor.clone();
            let defaults = defaults.clone();
            Arc::new(move |ctx: &CommandContext| {
                executor(&ctx.with_defaults(&defaults)).map(|r| r.result())
            })
        };

        let extra = if path.is_empty() {
            self.requirement.clone()
        } else {
            None
        };
        let mut node = literal(name).requirement(combine(spec.permission.clone(), extra));
        if spec.hidden {
            node = node.hidden();
        }

        let mut chain: Option<NodeBuilder> = None;
        for (index, arg) in spec.args.iter().enumerate().rev() {
            let mut arg_node = argument(arg.name.clone(), arg.kind.clone());
            if arg.repeated {
                arg_node = arg_node.repeated();
            }
            if let Some(provider) = self.providers.get(&arg.name) {
                arg_node = arg_node.suggests(provider.clone());
            } else if arg.suggestions == SuggestionMode::AskServer {
                arg_node = arg_node.suggests(kind_provider(&arg.kind));
            }
            let rest_optional = spec.args[index + 1..].iter().all(|a| !a.required);
            if rest_optional {
                arg_node = arg_node.command(executor.as_ref().map(wrap));
            }
            if let Some(next) = chain.take() {
                arg_node = arg_node.then(next);
            }
            chain = Some(arg_node);
        }

        let literal_executes = spec.args.first().map_or(true, |a| !a.required);
        if literal_executes {
            node = node.command(executor.as_ref().map(wrap));
        }
        if let Some(chain) = chain {
            node = node.then(chain);
        }
        for sub in &spec.subcommands {
            let mut sub_path = path.to_vec();
            sub_path.push(sub.name.to_lowercase());
            node = node.then(self.level_node(sub, &sub.name, &sub_path)?);
        }
        Ok(node)
    }
}

fn combine(permission: Option<String>, extra: Option<Requirement>) -> Option<Requirement> {
    match (permission, extra) {
        (None, None) => None,
        (permission, extra) => Some(Arc::new(move |cause: &CommandCause| {
            permission.as_deref().map_or(true, |p| cause.has_permission(p))
                && extra.as_ref().map_or(true, |r| r(cause))
        })),
    }
}

/// Builds node trees from [`ManagedCommand`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManagedFactory;

impl NodeFactory for ManagedFactory {
    type Command = ManagedCommand;

    fn create_node(
        &self,
        alias: &str,
        command: &Arc<ManagedCommand>,
    ) -> Result<NodeBuilder, RegistrationError> {
        command.spec.validate()?;
        command.level_node(&command.spec, alias, &[])
    }

    fn help(&self, cause: &CommandCause, alias: &str, command: &ManagedCommand) -> Option<String> {
        let requirement = combine(command.spec.permission.clone(), command.requirement.clone());
        if !requirement.map_or(true, |r| r(cause)) {
            return None;
        }
        let mut spec = visible_spec(&command.spec, cause);
        spec.name = alias.to_string();
        Some(render_help(&spec))
    }
}

/// `spec` without the subcommands `cause` lacks the permission for.
fn visible_spec(spec: &CommandSpec, cause: &CommandCause) -> CommandSpec {
    let mut visible = spec.clone();
    visible.subcommands = spec
        .subcommands
        .iter()
        .filter(|sub| sub.permission.as_deref().map_or(true, |p| cause.has_permission(p)))
        .map(|sub| visible_spec(sub, cause))
        .collect();
    visible
}

/// Registrar for declaratively described commands.
pub type ManagedRegistrar = TreeRegistrar<ManagedFactory>;

impl ManagedRegistrar {
    pub fn managed() -> Self {
        TreeRegistrar::new(super::RegistrarKey::managed(), ManagedFactory)
    }
}
