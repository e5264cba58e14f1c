//! Parsing, execution and completion over a command tree.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tracing::trace;

use crate::argument::{kind_suggestions, ArgumentValue};
use crate::cause::CommandCause;
use crate::context::CommandContext;
use crate::error::{CommandError, RegistrationError, SyntaxError, SyntaxErrorKind};
use crate::node::{Command, CommandNode, NodeBuilder, NodeKind};
use crate::reader::{floor_boundary, StringReader};
use crate::suggestion::{StringRange, Suggestions, SuggestionsBuilder};

/// Outcome of parsing a line against a tree.
#[derive(Clone)]
pub struct ParseResults {
    context: CommandContext,
    command: Option<Command>,
    cursor: usize,
    errors: Vec<SyntaxError>,
}

impl ParseResults {
    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    pub fn input(&self) -> &str {
        self.context.input()
    }

    /// How far parsing got.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the whole line was consumed.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.input().len()
    }

    pub fn is_executable(&self) -> bool {
        self.is_complete() && self.command.is_some()
    }

    /// Failures of the branches tried at the point parsing stopped.
    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    fn rank(&self) -> (bool, bool) {
        (self.is_complete(), self.errors.is_empty())
    }
}

impl std::fmt::Debug for ParseResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseResults")
            .field("context", &self.context)
            .field("executable", &self.command.is_some())
            .field("cursor", &self.cursor)
            .field("errors", &self.errors)
            .finish()
    }
}

/// A command tree rooted at an anonymous root node.
///
/// The root is shared copy-on-write: cloning a dispatcher or taking a
/// snapshot of its root is cheap, and mutation never disturbs readers of an
/// older snapshot.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    root: Arc<CommandNode>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            root: Arc::new(CommandNode::root()),
        }
    }

    pub fn root(&self) -> &Arc<CommandNode> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut CommandNode {
        Arc::make_mut(&mut self.root)
    }

    /// Build and attach a top-level literal.
    pub fn register(&mut self, builder: NodeBuilder) -> Result<Arc<CommandNode>, RegistrationError> {
        self.attach(builder.build())
    }

    /// Attach a built top-level literal.
    pub fn attach(&mut self, node: CommandNode) -> Result<Arc<CommandNode>, RegistrationError> {
        if !node.is_literal() {
            return Err(RegistrationError::NotALiteral);
        }
        self.root_mut().add_child(node)
    }

    /// Make `alias` forward to the top-level literal `target`.
    pub fn add_alias(&mut self, alias: &str, target: &str) -> Result<(), RegistrationError> {
        self.root_mut().add_redirect(alias, target)
    }

    /// Detach a top-level literal together with its aliases.
    pub fn remove(&mut self, name: &str) -> Option<Arc<CommandNode>> {
        if self.root.child(name).is_none() {
            return None;
        }
        self.root_mut().remove_child(name)
    }

    pub fn remove_alias(&mut self, alias: &str) -> bool {
        if !self.root.redirects().contains_key(&alias.to_lowercase()) {
            return false;
        }
        self.root_mut().remove_redirect(alias).is_some()
    }

    pub fn find_node(&self, path: &[&str]) -> Option<&CommandNode> {
        self.root.find(path)
    }

    /// Parse `input` as seen by `cause`.
    ///
    /// Nodes the cause cannot use are invisible. A literal matching the next
    /// word shadows argument siblings, and the first branch in declaration
    /// order that consumes the whole line wins.
    pub fn parse(&self, input: &str, cause: &CommandCause) -> ParseResults {
        let context = CommandContext::new(cause.clone(), input);
        self.parse_nodes(&self.root, 0, context, None)
    }

    fn parse_nodes(
        &self,
        node: &CommandNode,
        cursor: usize,
        context: CommandContext,
        command: Option<Command>,
    ) -> ParseResults {
        let input = context.input().to_string();
        let mut errors = Vec::new();
        let mut best: Option<ParseResults> = None;

        for child in relevant_children(node, &input, cursor) {
            if !child.can_use(context.cause()) {
                continue;
            }
            let mut reader = StringReader::at(&input, cursor);
            let mut branch = context.clone();
            let start = reader.cursor();
            if let Err(e) = parse_node(child, &mut reader, &mut branch) {
                errors.push(e);
                continue;
            }
            if reader.can_read() && reader.peek() != Some(crate::reader::SEPARATOR) {
                errors.push(reader.error(SyntaxErrorKind::ExpectedSeparator));
                continue;
            }
            branch.push_node(child.clone(), StringRange::new(start, reader.cursor()));

            let result = if reader.at_separator() {
                let next = self.forward(child);
                if !next.can_use(branch.cause()) {
                    errors.push(reader.error(SyntaxErrorKind::UnknownArgument));
                    continue;
                }
                reader.skip();
                self.parse_nodes(next, reader.cursor(), branch, child.command().cloned())
            } else {
                ParseResults {
                    context: branch,
                    command: child.command().cloned(),
                    cursor: reader.cursor(),
                    errors: Vec::new(),
                }
            };

            if result.rank() == (true, true) {
                return result;
            }
            if best.as_ref().map_or(true, |b| result.rank() > b.rank()) {
                best = Some(result);
            }
        }

        match best {
            Some(result) => result,
            None => ParseResults {
                context,
                command,
                cursor,
                errors,
            },
        }
    }

    /// The node parsing continues at after `node`.
    fn forward<'a>(&'a self, node: &'a CommandNode) -> &'a CommandNode {
        match node.redirect() {
            Some(path) => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                self.root.find(&path).unwrap_or(node)
            }
            None => node,
        }
    }

    pub fn execute(&self, input: &str, cause: &CommandCause) -> Result<i32, CommandError> {
        let parse = self.parse(input, cause);
        self.execute_parsed(&parse)
    }

    pub fn execute_parsed(&self, parse: &ParseResults) -> Result<i32, CommandError> {
        let input = parse.input();
        if !parse.is_complete() {
            if let [error] = parse.errors() {
                return Err(error.clone().into());
            }
            let kind = if parse.context().nodes().is_empty() {
                SyntaxErrorKind::UnknownCommand
            } else {
                SyntaxErrorKind::UnknownArgument
            };
            return Err(SyntaxError::new(kind, input, parse.cursor()).into());
        }
        let Some(command) = &parse.command else {
            return Err(SyntaxError::new(SyntaxErrorKind::UnknownCommand, input, parse.cursor()).into());
        };
        trace!(input = %input, "executing command");
        command(parse.context())
    }

    /// Completions for the end of the parsed line.
    pub fn completions(&self, parse: &ParseResults) -> BoxFuture<'static, Suggestions> {
        self.completions_at(parse, parse.input().len())
    }

    /// Completions for the token under `cursor`.
    ///
    /// Literal children complete from their name. Arguments ask their
    /// provider when they have one and otherwise offer what their kind
    /// allows.
    pub fn completions_at(
        &self,
        parse: &ParseResults,
        cursor: usize,
    ) -> BoxFuture<'static, Suggestions> {
        let input = parse.input();
        let cursor = floor_boundary(input, cursor);
        let truncated = input[..cursor].to_string();
        let (parent, start) = self.suggestion_context(parse, cursor);
        let cause = parse.context().cause();
        if !parent.can_use(cause) {
            return Box::pin(future::ready(Suggestions::empty()));
        }

        let mut pending = Vec::new();
        for child in parent.children() {
            if child.is_hidden() || !child.can_use(cause) {
                continue;
            }
            let mut builder = SuggestionsBuilder::new(truncated.clone(), start);
            match child.kind() {
                NodeKind::Literal { literal } => {
                    if builder.matches(literal) {
                        builder.suggest(literal.clone());
                    }
                    pending.push(builder.build_future());
                }
                NodeKind::Argument {
                    kind, suggestions, ..
                } => match suggestions {
                    Some(provider) => pending.push(provider.suggestions(parse.context(), builder)),
                    None => {
                        builder.suggest_matching(kind_suggestions(kind));
                        pending.push(builder.build_future());
                    }
                },
                NodeKind::Root => {}
            }
        }
        for (key, target) in parent.redirects() {
            let visible = parent
                .child(target)
                .is_some_and(|t| !t.is_hidden() && t.can_use(cause));
            if visible {
                let mut builder = SuggestionsBuilder::new(truncated.clone(), start);
                if builder.matches(key) {
                    builder.suggest(key.clone());
                }
                pending.push(builder.build_future());
            }
        }

        Box::pin(async move {
            let results = future::join_all(pending).await;
            Suggestions::merge(&truncated, results)
        })
    }

    fn suggestion_context<'a>(
        &'a self,
        parse: &'a ParseResults,
        cursor: usize,
    ) -> (&'a CommandNode, usize) {
        let mut parent: &CommandNode = &self.root;
        let mut start = 0;
        for parsed in parse.context().nodes() {
            if parsed.range.end < cursor {
                parent = self.forward(&parsed.node);
                start = parsed.range.end + 1;
            } else {
                if parsed.range.start <= cursor {
                    start = parsed.range.start;
                }
                break;
            }
        }
        (parent, start)
    }

    /// Usage of each child of `node` the cause can use, as
    /// `(child name, usage)` in declaration order.
    pub fn smart_usage(&self, node: &CommandNode, cause: &CommandCause) -> Vec<(String, String)> {
        let optional = node.is_executable();
        node.children()
            .filter(|child| !child.is_hidden())
            .filter_map(|child| {
                smart_usage_of(child, cause, optional, false)
                    .map(|usage| (child.name().to_string(), usage))
            })
            .collect()
    }
}

/// Children worth trying at `cursor`: the literal (or redirect key) naming
/// the next word if there is one, otherwise every argument child.
fn relevant_children<'a>(node: &'a CommandNode, input: &str, cursor: usize) -> Vec<&'a Arc<CommandNode>> {
    let word = StringReader::at(input, cursor).read_unquoted();
    let literal = node
        .children()
        .find(|c| c.is_literal() && c.name().eq_ignore_ascii_case(word))
        .or_else(|| {
            node.redirects()
                .get(&word.to_lowercase())
                .and_then(|target| node.child(target))
        });
    match literal {
        Some(literal) => vec![literal],
        None => node.children().filter(|c| !c.is_literal()).collect(),
    }
}

fn parse_node(
    node: &CommandNode,
    reader: &mut StringReader<'_>,
    context: &mut CommandContext,
) -> Result<(), SyntaxError> {
    match node.kind() {
        NodeKind::Root => Ok(()),
        NodeKind::Literal { .. } => {
            reader.read_unquoted();
            Ok(())
        }
        NodeKind::Argument {
            name,
            kind,
            repeated,
            ..
        } => {
            let values = if *repeated {
                ArgumentValue::parse_repeated(kind, reader)?
            } else {
                vec![ArgumentValue::parse(kind, reader)?]
            };
            context.push_values(name, values);
            Ok(())
        }
    }
}

fn smart_usage_of(
    node: &CommandNode,
    cause: &CommandCause,
    optional: bool,
    deep: bool,
) -> Option<String> {
    if !node.can_use(cause) {
        return None;
    }
    let this = if optional {
        format!("[{}]", node.usage_text())
    } else {
        node.usage_text()
    };
    if deep {
        return Some(this);
    }
    if let Some(path) = node.redirect() {
        let target = if path.is_empty() {
            "...".to_string()
        } else {
            path.join(" ")
        };
        return Some(format!("{} -> {}", this, target));
    }

    let child_optional = node.is_executable();
    let (open, close) = if child_optional { ("[", "]") } else { ("(", ")") };
    let children: Vec<&Arc<CommandNode>> = node
        .children()
        .filter(|c| !c.is_hidden() && c.can_use(cause))
        .collect();
    match children.as_slice() {
        [] => Some(this),
        [only] => match smart_usage_of(only, cause, child_optional, child_optional) {
            Some(usage) => Some(format!("{} {}", this, usage)),
            None => Some(this),
        },
        many => {
            let mut usages: Vec<String> = many
                .iter()
                .filter_map(|c| smart_usage_of(c, cause, false, true))
                .collect();
            usages.dedup();
            match usages.as_slice() {
                [] => Some(this),
                [usage] => {
                    let usage = if child_optional {
                        format!("[{}]", usage)
                    } else {
                        usage.clone()
                    };
                    Some(format!("{} {}", this, usage))
                }
                _ => Some(format!("{} {}{}{}", this, open, usages.join("|"), close)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::StaticSubject;
    use crate::context::Key;
    use crate::node::{argument, literal};
    use crate::suggestion::provider_fn;
    use lodestone_api::ArgKind;

    const AMOUNT: Key<i64> = Key::of("amount");
    const TARGET: Key<String> = Key::of("target");

    fn integer() -> ArgKind {
        ArgKind::Integer {
            min: Some(1),
            max: None,
        }
    }

    fn give_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                literal("give").then(
                    argument("target", ArgKind::Word)
                        .then(argument("amount", integer()).executes(|ctx| {
                            Ok(ctx.require_one(&AMOUNT).map_err(CommandError::internal)? as i32)
                        }))
                        .executes(|ctx| {
                            ctx.require_one(&TARGET).map_err(CommandError::internal)?;
                            Ok(1)
                        }),
                ),
            )
            .unwrap();
        dispatcher
            .register(
                literal("admin")
                    .requires_permission("server.admin")
                    .executes(|_| Ok(7)),
            )
            .unwrap();
        dispatcher
    }

    fn player(perms: &[&str]) -> CommandCause {
        CommandCause::new(Arc::new(StaticSubject::new("alice", perms.iter().copied())))
    }

    #[test]
    fn test_execute_with_arguments() {
        let dispatcher = give_dispatcher();
        let cause = CommandCause::console();
        assert_eq!(dispatcher.execute("give steve 5", &cause).unwrap(), 5);
        assert_eq!(dispatcher.execute("GIVE steve", &cause).unwrap(), 1);
    }

    #[test]
    fn test_argument_errors_are_reported() {
        let dispatcher = give_dispatcher();
        let err = dispatcher
            .execute("give steve 0", &CommandCause::console())
            .unwrap_err();
        assert!(matches!(
            err.syntax_kind(),
            Some(SyntaxErrorKind::NumberTooSmall { .. })
        ));
    }

    #[test]
    fn test_unknown_and_incomplete() {
        let dispatcher = give_dispatcher();
        let cause = CommandCause::console();
        assert_eq!(
            dispatcher.execute("take steve", &cause).unwrap_err().syntax_kind(),
            Some(&SyntaxErrorKind::UnknownCommand)
        );
        assert_eq!(
            dispatcher.execute("give", &cause).unwrap_err().syntax_kind(),
            Some(&SyntaxErrorKind::UnknownCommand)
        );
        assert_eq!(
            dispatcher.execute("", &cause).unwrap_err().syntax_kind(),
            Some(&SyntaxErrorKind::UnknownCommand)
        );
    }

    #[test]
    fn test_denied_command_looks_unknown() {
        let dispatcher = give_dispatcher();
        assert_eq!(
            dispatcher.execute("admin", &player(&[])).unwrap_err().syntax_kind(),
            Some(&SyntaxErrorKind::UnknownCommand)
        );
        assert_eq!(dispatcher.execute("admin", &player(&["server.admin"])).unwrap(), 7);
    }

    #[test]
    fn test_alias_redirect_parses_as_target() {
        let mut dispatcher = give_dispatcher();
        dispatcher.add_alias("g", "give").unwrap();
        assert_eq!(
            dispatcher.execute("g steve 3", &CommandCause::console()).unwrap(),
            3
        );
        assert!(dispatcher.remove_alias("g"));
        assert!(dispatcher.execute("g steve 3", &CommandCause::console()).is_err());
    }

    #[test]
    fn test_forward_redirect() {
        let mut dispatcher = give_dispatcher();
        dispatcher
            .register(literal("run").redirect(Vec::<String>::new()))
            .unwrap();
        assert_eq!(
            dispatcher
                .execute("run give steve 4", &CommandCause::console())
                .unwrap(),
            4
        );
    }

    #[test]
    fn test_redirect_into_denied_node_fails() {
        let mut dispatcher = give_dispatcher();
        dispatcher
            .register(literal("sudo").redirect(["admin"]))
            .unwrap();
        let guest = player(&[]);
        assert!(dispatcher.execute("sudo", &guest).is_err());
        let parse = dispatcher.parse("sudo ", &guest);
        assert!(futures::executor::block_on(dispatcher.completions(&parse)).is_empty());
    }

    #[test]
    fn test_trailing_separator_is_incomplete() {
        let dispatcher = give_dispatcher();
        let err = dispatcher
            .execute("admin ", &player(&["server.admin"]))
            .unwrap_err();
        assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::UnknownArgument));
    }

    #[test]
    fn test_literal_shadows_argument() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                literal("home")
                    .then(literal("list").executes(|_| Ok(10)))
                    .then(argument("name", ArgKind::Word).executes(|_| Ok(20))),
            )
            .unwrap();
        let cause = CommandCause::console();
        assert_eq!(dispatcher.execute("home list", &cause).unwrap(), 10);
        assert_eq!(dispatcher.execute("home base", &cause).unwrap(), 20);
    }

    #[test]
    fn test_repeated_argument_collects_values() {
        const PLAYERS: Key<String> = Key::of("players");
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(literal("kick").then(
                argument("players", ArgKind::Word).repeated().executes(|ctx| {
                    Ok(ctx.get_all(&PLAYERS).len() as i32)
                }),
            ))
            .unwrap();
        assert_eq!(
            dispatcher
                .execute("kick a b c", &CommandCause::console())
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_root_completions_respect_permissions() {
        let dispatcher = give_dispatcher();
        let parse = dispatcher.parse("", &player(&[]));
        let suggestions = futures::executor::block_on(dispatcher.completions(&parse));
        assert_eq!(suggestions.texts(), vec!["give"]);

        let parse = dispatcher.parse("a", &player(&["server.admin"]));
        let suggestions = futures::executor::block_on(dispatcher.completions(&parse));
        assert_eq!(suggestions.texts(), vec!["admin"]);
    }

    #[test]
    fn test_argument_completions_use_provider() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                literal("home").then(
                    argument("name", ArgKind::Word)
                        .suggests(provider_fn(|_, _| vec!["base".into(), "barn".into(), "cave".into()]))
                        .executes(|_| Ok(1)),
                ),
            )
            .unwrap();
        let parse = dispatcher.parse("home b", &CommandCause::console());
        let suggestions = futures::executor::block_on(dispatcher.completions(&parse));
        assert_eq!(suggestions.texts(), vec!["barn", "base"]);
        assert_eq!(suggestions.range(), StringRange::new(5, 6));
    }

    #[test]
    fn test_smart_usage() {
        let dispatcher = give_dispatcher();
        let cause = CommandCause::console();
        let usage = dispatcher.smart_usage(dispatcher.root(), &cause);
        assert_eq!(
            usage,
            vec![
                ("give".to_string(), "give <target> [<amount>]".to_string()),
                ("admin".to_string(), "admin".to_string()),
            ]
        );
        let hidden = dispatcher.smart_usage(dispatcher.root(), &player(&[]));
        assert_eq!(hidden.len(), 1);
    }
}
