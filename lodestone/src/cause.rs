//! Who invoked a command, and from where.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// An entity that holds permissions.
pub trait Subject: Send + Sync {
    /// Stable identifier, e.g. a player name or `console`.
    fn identifier(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;
}

/// Whether a granted permission node covers the requested one.
///
/// `*` grants everything and `a.b.*` grants `a.b` and every node below it.
pub fn permission_matches(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }
    match granted.strip_suffix(".*") {
        Some(prefix) => {
            requested == prefix
                || requested
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
        None => false,
    }
}

/// The server console. Holds every permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSubject;

impl Subject for ConsoleSubject {
    fn identifier(&self) -> &str {
        "console"
    }

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }
}

/// Subject with a fixed set of granted nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSubject {
    id: String,
    granted: BTreeSet<String>,
}

impl StaticSubject {
    pub fn new<I, S>(id: impl Into<String>, granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            granted: granted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(String::as_str)
    }
}

impl Subject for StaticSubject {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.granted
            .iter()
            .any(|granted| permission_matches(granted, permission))
    }
}

/// A position in a world.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

/// The block a command was aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub world: String,
    pub position: (i32, i32, i32),
    pub block: String,
}

/// Origin of a command invocation.
///
/// Carries the permission subject plus optional facets describing where the
/// command was run. Cheap to clone.
#[derive(Clone)]
pub struct CommandCause {
    subject: Arc<dyn Subject>,
    location: Option<Location>,
    target_block: Option<BlockSnapshot>,
    causes: Vec<String>,
}

impl CommandCause {
    pub fn new(subject: Arc<dyn Subject>) -> Self {
        Self {
            subject,
            location: None,
            target_block: None,
            causes: Vec::new(),
        }
    }

    pub fn console() -> Self {
        Self::new(Arc::new(ConsoleSubject))
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_target_block(mut self, block: BlockSnapshot) -> Self {
        self.target_block = Some(block);
        self
    }

    /// Append a contextual cause, outermost first.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn subject(&self) -> &Arc<dyn Subject> {
        &self.subject
    }

    pub fn identifier(&self) -> &str {
        self.subject.identifier()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.subject.has_permission(permission)
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn target_block(&self) -> Option<&BlockSnapshot> {
        self.target_block.as_ref()
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl fmt::Debug for CommandCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCause")
            .field("subject", &self.subject.identifier())
            .field("location", &self.location)
            .field("target_block", &self.target_block)
            .field("causes", &self.causes)
            .finish()
    }
}
