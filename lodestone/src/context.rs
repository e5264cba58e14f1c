//! Parsed invocation handed to command executors and suggestion providers.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::argument::{ArgumentValue, FromArgument};
use crate::cause::{BlockSnapshot, CommandCause, Location, Subject};
use crate::error::ContextError;
use crate::node::CommandNode;
use crate::suggestion::StringRange;

/// Typed name of a parameter.
pub struct Key<T> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn of(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// A node matched during parsing and the input it consumed.
#[derive(Clone)]
pub struct ParsedNode {
    pub node: Arc<CommandNode>,
    pub range: StringRange,
}

impl fmt::Debug for ParsedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedNode")
            .field("node", &self.node.name())
            .field("range", &self.range)
            .finish()
    }
}

/// Immutable view of one invocation: cause, input and parsed parameters.
#[derive(Clone)]
pub struct CommandContext {
    cause: CommandCause,
    input: String,
    arguments: BTreeMap<String, Vec<ArgumentValue>>,
    nodes: Vec<ParsedNode>,
}

impl CommandContext {
    pub fn new(cause: CommandCause, input: impl Into<String>) -> Self {
        Self {
            cause,
            input: input.into(),
            arguments: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }

    pub(crate) fn push_node(&mut self, node: Arc<CommandNode>, range: StringRange) {
        self.nodes.push(ParsedNode { node, range });
    }

    pub(crate) fn push_values(&mut self, name: &str, values: Vec<ArgumentValue>) {
        self.arguments
            .entry(name.to_string())
            .or_default()
            .extend(values);
    }

    /// Copy with `defaults` filled in for every key that has no value.
    pub fn with_defaults(&self, defaults: &[(String, ArgumentValue)]) -> CommandContext {
        let mut context = self.clone();
        for (name, value) in defaults {
            context
                .arguments
                .entry(name.clone())
                .or_insert_with(|| vec![value.clone()]);
        }
        context
    }

    pub fn cause(&self) -> &CommandCause {
        &self.cause
    }

    pub fn subject(&self) -> &Arc<dyn Subject> {
        self.cause.subject()
    }

    pub fn location(&self) -> Option<&Location> {
        self.cause.location()
    }

    pub fn target_block(&self) -> Option<&BlockSnapshot> {
        self.cause.target_block()
    }

    /// The full line being run or completed.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn nodes(&self) -> &[ParsedNode] {
        &self.nodes
    }

    /// Raw values recorded under `name`.
    pub fn values(&self, name: &str) -> &[ArgumentValue] {
        self.arguments.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_any<T>(&self, key: &Key<T>) -> bool {
        !self.values(key.name()).is_empty()
    }

    /// The single value for `key`, if any.
    ///
    /// Fails when more than one value exists or the value has another type.
    pub fn get_one<T: FromArgument>(&self, key: &Key<T>) -> Result<Option<T>, ContextError> {
        match self.values(key.name()) {
            [] => Ok(None),
            [value] => T::from_argument(value)
                .map(Some)
                .ok_or_else(|| ContextError::TypeMismatch {
                    key: key.name().to_string(),
                    expected: T::EXPECTED,
                }),
            many => Err(ContextError::AmbiguousValue {
                key: key.name().to_string(),
                count: many.len(),
            }),
        }
    }

    /// The single value for `key`, failing when absent.
    pub fn require_one<T: FromArgument>(&self, key: &Key<T>) -> Result<T, ContextError> {
        self.get_one(key)?.ok_or_else(|| ContextError::NoSuchElement {
            key: key.name().to_string(),
        })
    }

    /// Every value for `key` in input order. Empty when absent.
    ///
    /// Values of another type are skipped.
    pub fn get_all<T: FromArgument>(&self, key: &Key<T>) -> Vec<T> {
        self.values(key.name())
            .iter()
            .filter_map(T::from_argument)
            .collect()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("cause", &self.cause)
            .field("input", &self.input)
            .field("arguments", &self.arguments)
            .field("nodes", &self.nodes)
            .finish()
    }
}
