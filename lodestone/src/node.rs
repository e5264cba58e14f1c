//! Command tree nodes.
//!
//! A node is the root, a literal keyword or a typed argument. Children keep
//! declaration order, which fixes parse priority and the order nodes are
//! sent to clients. Besides children, a node records redirect keys: alternate
//! names that forward to one of its children. Secondary aliases live here on
//! the root. Child names and redirect keys never overlap.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lodestone_api::ArgKind;

use crate::alias::PluginId;
use crate::cause::CommandCause;
use crate::context::CommandContext;
use crate::error::{CommandError, RegistrationError};
use crate::registrar::RegistrarKey;
use crate::suggestion::SharedProvider;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a node. Clones of a node share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Executor attached to a node. Returns the command's integer result.
pub type Command = Arc<dyn Fn(&CommandContext) -> Result<i32, CommandError> + Send + Sync>;

/// Predicate deciding whether a cause may see and use a node.
pub type Requirement = Arc<dyn Fn(&CommandCause) -> bool + Send + Sync>;

/// Requirement satisfied when the cause holds `permission`.
pub fn permission_requirement(permission: impl Into<String>) -> Requirement {
    let permission = permission.into();
    Arc::new(move |cause: &CommandCause| cause.has_permission(&permission))
}

/// Which registrar and owner created a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOrigin {
    pub registrar: RegistrarKey,
    pub owner: PluginId,
}

#[derive(Clone)]
pub enum NodeKind {
    Root,
    Literal {
        literal: String,
    },
    Argument {
        name: String,
        kind: ArgKind,
        repeated: bool,
        suggestions: Option<SharedProvider>,
    },
}

#[derive(Clone)]
pub struct CommandNode {
    id: NodeId,
    kind: NodeKind,
    children: Vec<Arc<CommandNode>>,
    redirects: BTreeMap<String, String>,
    requirement: Option<Requirement>,
    command: Option<Command>,
    redirect: Option<Vec<String>>,
    hidden: bool,
    origin: Option<NodeOrigin>,
}

impl CommandNode {
    pub fn root() -> Self {
        Self::with_kind(NodeKind::Root)
    }

    fn with_kind(kind: NodeKind) -> Self {
        Self {
            id: NodeId::next(),
            kind,
            children: Vec::new(),
            redirects: BTreeMap::new(),
            requirement: None,
            command: None,
            redirect: None,
            hidden: false,
            origin: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Literal or argument name. Empty for the root.
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Root => "",
            NodeKind::Literal { literal } => literal,
            NodeKind::Argument { name, .. } => name,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root)
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Literal { .. })
    }

    /// Whether a client must ask the server to complete this node.
    pub fn is_complex(&self) -> bool {
        self.custom_suggestions().is_some()
    }

    pub fn custom_suggestions(&self) -> Option<&SharedProvider> {
        match &self.kind {
            NodeKind::Argument { suggestions, .. } => suggestions.as_ref(),
            _ => None,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &Arc<CommandNode>> {
        self.children.iter()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Child by name. Literal names compare case-insensitively.
    pub fn child(&self, name: &str) -> Option<&Arc<CommandNode>> {
        self.children.iter().find(|c| c.matches_key(name))
    }

    /// Child by name or by a redirect key forwarding to it.
    pub fn resolve(&self, key: &str) -> Option<&Arc<CommandNode>> {
        self.child(key).or_else(|| {
            self.redirects
                .get(&key.to_lowercase())
                .and_then(|target| self.child(target))
        })
    }

    /// Redirect keys and the child each forwards to.
    pub fn redirects(&self) -> &BTreeMap<String, String> {
        &self.redirects
    }

    pub fn requirement(&self) -> Option<&Requirement> {
        self.requirement.as_ref()
    }

    pub fn can_use(&self, cause: &CommandCause) -> bool {
        self.requirement.as_ref().map_or(true, |req| req(cause))
    }

    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn is_executable(&self) -> bool {
        self.command.is_some()
    }

    /// Path from the root of the node parsing continues at.
    pub fn redirect(&self) -> Option<&[String]> {
        self.redirect.as_deref()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn origin(&self) -> Option<&NodeOrigin> {
        self.origin.as_ref()
    }

    pub fn set_origin(&mut self, origin: NodeOrigin) {
        self.origin = Some(origin);
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// How the node reads in usage text.
    pub fn usage_text(&self) -> String {
        match &self.kind {
            NodeKind::Root => String::new(),
            NodeKind::Literal { literal } => literal.clone(),
            NodeKind::Argument { name, repeated, .. } => {
                if *repeated {
                    format!("<{}...>", name)
                } else {
                    format!("<{}>", name)
                }
            }
        }
    }

    fn matches_key(&self, key: &str) -> bool {
        match &self.kind {
            NodeKind::Root => false,
            NodeKind::Literal { literal } => literal.eq_ignore_ascii_case(key),
            NodeKind::Argument { name, .. } => name == key,
        }
    }

    fn display_name(&self) -> &str {
        if self.is_root() {
            "<root>"
        } else {
            self.name()
        }
    }

    fn key_taken(&self, key: &str) -> bool {
        self.child(key).is_some() || self.redirects.contains_key(&key.to_lowercase())
    }

    /// Attach a child, rejecting keys already used by a child or redirect.
    pub fn add_child(&mut self, child: CommandNode) -> Result<Arc<CommandNode>, RegistrationError> {
        if self.key_taken(child.name()) {
            return Err(RegistrationError::NodeCollision {
                parent: self.display_name().to_string(),
                key: child.name().to_string(),
            });
        }
        let child = Arc::new(child);
        self.children.push(child.clone());
        Ok(child)
    }

    /// Attach a child, folding it into an existing child of the same name.
    ///
    /// The incoming executor wins and grandchildren merge recursively.
    pub fn merge_child(&mut self, child: CommandNode) {
        let existing = self
            .children
            .iter_mut()
            .find(|c| c.matches_key(child.name()) && c.is_literal() == child.is_literal());
        match existing {
            Some(existing) => {
                let existing = Arc::make_mut(existing);
                if child.command.is_some() {
                    existing.command = child.command;
                }
                for grandchild in child.children {
                    existing.merge_child(Arc::unwrap_or_clone(grandchild));
                }
            }
            None => self.children.push(Arc::new(child)),
        }
    }

    /// Add `key` as an alternate name for the child `target`.
    pub fn add_redirect(&mut self, key: &str, target: &str) -> Result<(), RegistrationError> {
        if self.child(target).is_none() {
            return Err(RegistrationError::MissingRedirectTarget(target.to_string()));
        }
        if self.key_taken(key) {
            return Err(RegistrationError::NodeCollision {
                parent: self.display_name().to_string(),
                key: key.to_string(),
            });
        }
        self.redirects
            .insert(key.to_lowercase(), target.to_lowercase());
        Ok(())
    }

    /// Detach a child and every redirect key forwarding to it.
    pub fn remove_child(&mut self, name: &str) -> Option<Arc<CommandNode>> {
        let index = self.children.iter().position(|c| c.matches_key(name))?;
        let removed = self.children.remove(index);
        let removed_name = removed.name().to_lowercase();
        self.redirects.retain(|_, target| *target != removed_name);
        Some(removed)
    }

    pub fn remove_redirect(&mut self, key: &str) -> Option<String> {
        self.redirects.remove(&key.to_lowercase())
    }

    /// Follow a path of child names or redirect keys from this node.
    pub fn find(&self, path: &[&str]) -> Option<&CommandNode> {
        let mut current = self;
        for segment in path {
            current = current.resolve(segment)?;
        }
        Some(current)
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CommandNode");
        s.field("id", &self.id)
            .field("name", &self.name())
            .field("executable", &self.is_executable())
            .field("complex", &self.is_complex())
            .field("hidden", &self.hidden);
        if !self.redirects.is_empty() {
            s.field("redirects", &self.redirects);
        }
        if let Some(redirect) = &self.redirect {
            s.field("redirect", redirect);
        }
        s.field("children", &self.children).finish()
    }
}

/// Hook applied to every node a builder creates.
pub trait NodeDecorator {
    fn decorate(&self, node: &mut CommandNode);
}

impl NodeDecorator for NodeOrigin {
    fn decorate(&self, node: &mut CommandNode) {
        node.set_origin(self.clone());
    }
}

impl<F> NodeDecorator for F
where
    F: Fn(&mut CommandNode),
{
    fn decorate(&self, node: &mut CommandNode) {
        self(node)
    }
}

/// Declarative builder for a node and its subtree.
#[derive(Clone)]
pub struct NodeBuilder {
    kind: NodeKind,
    children: Vec<NodeBuilder>,
    requirement: Option<Requirement>,
    command: Option<Command>,
    redirect: Option<Vec<String>>,
    hidden: bool,
}

/// Start a literal node.
pub fn literal(literal: impl Into<String>) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Literal {
        literal: literal.into(),
    })
}

/// Start an argument node.
pub fn argument(name: impl Into<String>, kind: ArgKind) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Argument {
        name: name.into(),
        kind,
        repeated: false,
        suggestions: None,
    })
}

impl NodeBuilder {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            requirement: None,
            command: None,
            redirect: None,
            hidden: false,
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Root => "",
            NodeKind::Literal { literal } => literal,
            NodeKind::Argument { name, .. } => name,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Literal { .. })
    }

    /// Rename a literal. Arguments are left as they are.
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        if let NodeKind::Literal { literal } = &mut self.kind {
            *literal = name.into();
        }
        self
    }

    pub fn then(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn requires<F>(mut self, requirement: F) -> Self
    where
        F: Fn(&CommandCause) -> bool + Send + Sync + 'static,
    {
        self.requirement = Some(Arc::new(requirement));
        self
    }

    pub fn requires_permission(mut self, permission: impl Into<String>) -> Self {
        self.requirement = Some(permission_requirement(permission));
        self
    }

    pub(crate) fn requirement(mut self, requirement: Option<Requirement>) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn executes<F>(mut self, command: F) -> Self
    where
        F: Fn(&CommandContext) -> Result<i32, CommandError> + Send + Sync + 'static,
    {
        self.command = Some(Arc::new(command));
        self
    }

    pub(crate) fn command(mut self, command: Option<Command>) -> Self {
        self.command = command;
        self
    }

    /// Complete this argument with `provider`. No effect on literals.
    pub fn suggests(mut self, provider: SharedProvider) -> Self {
        if let NodeKind::Argument { suggestions, .. } = &mut self.kind {
            *suggestions = Some(provider);
        }
        self
    }

    /// Let this argument consume every following value of its kind.
    pub fn repeated(mut self) -> Self {
        if let NodeKind::Argument { repeated, .. } = &mut self.kind {
            *repeated = true;
        }
        self
    }

    /// Continue parsing at the node found at `path` from the root.
    pub fn redirect<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redirect = Some(path.into_iter().map(Into::into).collect());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn build(self) -> CommandNode {
        self.build_with(&|_: &mut CommandNode| {})
    }

    /// Build the subtree, passing every new node through `decorator`.
    pub fn build_with(self, decorator: &dyn NodeDecorator) -> CommandNode {
        let mut node = CommandNode::with_kind(self.kind);
        node.requirement = self.requirement;
        node.command = self.command;
        node.redirect = self.redirect;
        node.hidden = self.hidden;
        for child in self.children {
            node.merge_child(child.build_with(decorator));
        }
        decorator.decorate(&mut node);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::StaticSubject;

    fn ok(_: &CommandContext) -> Result<i32, CommandError> {
        Ok(1)
    }

    #[test]
    fn test_builder_shape() {
        let node = literal("home")
            .executes(ok)
            .then(argument("name", ArgKind::Word).executes(ok))
            .build();
        assert!(node.is_literal());
        assert!(node.is_executable());
        let child = node.child("name").unwrap();
        assert!(child.is_executable());
        assert!(!child.is_complex());
        assert!(node.child("HOME").is_none());
    }

    #[test]
    fn test_duplicate_builder_children_merge() {
        let node = literal("home")
            .then(literal("set").then(argument("name", ArgKind::Word).executes(ok)))
            .then(literal("set").executes(ok))
            .build();
        assert_eq!(node.children().count(), 1);
        let set = node.child("set").unwrap();
        assert!(set.is_executable());
        assert!(set.child("name").is_some());
    }

    #[test]
    fn test_child_and_redirect_keys_are_disjoint() {
        let mut root = CommandNode::root();
        root.add_child(literal("home").build()).unwrap();
        root.add_redirect("h", "home").unwrap();

        assert!(matches!(
            root.add_child(literal("h").build()),
            Err(RegistrationError::NodeCollision { .. })
        ));
        assert!(matches!(
            root.add_redirect("Home", "home"),
            Err(RegistrationError::NodeCollision { .. })
        ));
        assert!(matches!(
            root.add_redirect("x", "missing"),
            Err(RegistrationError::MissingRedirectTarget(_))
        ));
        assert_eq!(root.resolve("H").unwrap().name(), "home");
    }

    #[test]
    fn test_remove_child_drops_redirects() {
        let mut root = CommandNode::root();
        root.add_child(literal("home").build()).unwrap();
        root.add_redirect("h", "home").unwrap();
        assert!(root.remove_child("home").is_some());
        assert!(root.redirects().is_empty());
        assert!(root.resolve("h").is_none());
    }

    #[test]
    fn test_decorator_reaches_every_node() {
        let origin = NodeOrigin {
            registrar: RegistrarKey::native(),
            owner: PluginId::new("homes"),
        };
        let node = literal("home")
            .then(argument("name", ArgKind::Word))
            .build_with(&origin);
        assert_eq!(node.origin(), Some(&origin));
        assert_eq!(node.child("name").unwrap().origin(), Some(&origin));
    }

    #[test]
    fn test_permission_requirement() {
        let node = literal("admin").requires_permission("server.admin").build();
        let alice = CommandCause::new(Arc::new(StaticSubject::new("alice", ["server.*"])));
        let bob = CommandCause::new(Arc::new(StaticSubject::new("bob", Vec::<String>::new())));
        assert!(node.can_use(&alice));
        assert!(!node.can_use(&bob));
    }

    #[test]
    fn test_usage_text() {
        let node = argument("players", ArgKind::Word).repeated().build();
        assert_eq!(node.usage_text(), "<players...>");
        assert_eq!(literal("tp").build().usage_text(), "tp");
    }
}
