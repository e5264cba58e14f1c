//! Error taxonomy of the command engine.
//!
//! Registration failures surface to the registering subsystem, dispatch
//! failures surface to the invoking client, and context access failures are
//! defects in a command implementation.

use lodestone_api::SpecError;
use thiserror::Error;

use crate::alias::PluginId;
use crate::registrar::RegistrarKey;

/// Number of characters of input shown before the error marker.
const CONTEXT_AMOUNT: usize = 10;

/// Why a registration attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Another owner already holds the alias.
    #[error("Alias '{alias}' is already owned by '{owner}'")]
    AliasCollision { alias: String, owner: PluginId },

    /// The registrar already holds a command under this primary alias.
    #[error("The primary alias '{0}' has already been registered")]
    DuplicatePrimaryAlias(String),

    #[error("Invalid alias '{0}': aliases must be non-empty and contain no whitespace")]
    InvalidAlias(String),

    /// A child or redirect key already exists under the parent node.
    #[error("Key '{key}' is already set under '{parent}'")]
    NodeCollision { parent: String, key: String },

    #[error("Redirect target '{0}' does not exist")]
    MissingRedirectTarget(String),

    #[error("Only literal nodes can be attached to the root")]
    NotALiteral,

    #[error("No registrar installed under '{0}'")]
    UnknownRegistrar(RegistrarKey),

    #[error("A registrar is already installed under '{0}'")]
    DuplicateRegistrar(RegistrarKey),

    #[error("Invalid command description: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("Invalid default '{value}' for parameter '{arg}': {reason}")]
    InvalidDefault {
        arg: String,
        value: String,
        reason: String,
    },
}

/// The grammar rule a command line violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxErrorKind {
    #[error("Unknown or incomplete command")]
    UnknownCommand,

    #[error("Incorrect argument for command")]
    UnknownArgument,

    #[error("Expected whitespace to end one argument, but found trailing data")]
    ExpectedSeparator,

    #[error("Expected a value")]
    ExpectedValue,

    #[error("Invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("Invalid number '{0}'")]
    InvalidFloat(String),

    #[error("Invalid boolean, expected 'true' or 'false' but found '{0}'")]
    InvalidBool(String),

    #[error("Number must not be less than {min}, found {found}")]
    NumberTooSmall { found: String, min: String },

    #[error("Number must not be more than {max}, found {found}")]
    NumberTooLarge { found: String, max: String },

    #[error("Invalid choice '{0}'")]
    InvalidChoice(String),

    #[error("Unclosed quoted string")]
    ExpectedEndOfQuote,

    #[error("Invalid escape sequence '\\{0}' in quoted string")]
    InvalidEscape(char),
}

/// A parse failure, positioned in the input line.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    kind: SyntaxErrorKind,
    input: String,
    cursor: Option<usize>,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, input: impl Into<String>, cursor: usize) -> Self {
        Self {
            kind,
            input: input.into(),
            cursor: Some(cursor),
        }
    }

    /// Error without a position, e.g. for an unknown alias.
    pub fn unpositioned(kind: SyntaxErrorKind) -> Self {
        Self {
            kind,
            input: String::new(),
            cursor: None,
        }
    }

    pub fn kind(&self) -> &SyntaxErrorKind {
        &self.kind
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// The input just before the cursor, followed by a marker.
    pub fn context(&self) -> Option<String> {
        let cursor = self.cursor?.min(self.input.len());
        if self.input.is_empty() || !self.input.is_char_boundary(cursor) {
            return None;
        }
        let before = &self.input[..cursor];
        let start = before
            .char_indices()
            .rev()
            .nth(CONTEXT_AMOUNT - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let prefix = if start > 0 { "..." } else { "" };
        Some(format!("{}{}<--[HERE]", prefix, &before[start..]))
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let (Some(cursor), Some(context)) = (self.cursor, self.context()) {
            write!(f, " at position {}: {}", cursor, context)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// Failure of a dispatched command, reported to the invoking client.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The line did not match the grammar, or named a command the cause
    /// cannot see.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// The command ran and reported a failure.
    #[error("{message}")]
    Failed { message: String },

    /// The command hit an unexpected failure.
    #[error("An internal error occurred while executing this command: {0}")]
    Internal(#[source] anyhow::Error),
}

impl CommandError {
    /// Convenience constructor for command-reported failures.
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary failure.
    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        CommandError::Internal(error.into())
    }

    /// Text shown to the invoking client.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, CommandError::Syntax(_))
    }

    /// The syntax error kind, if this is a parse failure.
    pub fn syntax_kind(&self) -> Option<&SyntaxErrorKind> {
        match self {
            CommandError::Syntax(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<SyntaxErrorKind> for CommandError {
    fn from(kind: SyntaxErrorKind) -> Self {
        CommandError::Syntax(SyntaxError::unpositioned(kind))
    }
}

/// Lets executors use `?` on context lookups.
impl From<ContextError> for CommandError {
    fn from(error: ContextError) -> Self {
        CommandError::internal(error)
    }
}

/// Misuse of [`crate::CommandContext`] by a command implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("No value exists for key '{key}'")]
    NoSuchElement { key: String },

    #[error("{count} values exist for key '{key}' where exactly one was expected")]
    AmbiguousValue { key: String, count: usize },

    #[error("Value for key '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_context_marker() {
        let err = SyntaxError::new(SyntaxErrorKind::UnknownArgument, "give steve diamond", 11);
        assert_eq!(err.context().unwrap(), "...ive steve <--[HERE]");
        assert!(err.to_string().starts_with("Incorrect argument for command at position 11"));
    }

    #[test]
    fn test_unpositioned_error_has_no_context() {
        let err = SyntaxError::unpositioned(SyntaxErrorKind::UnknownCommand);
        assert!(err.context().is_none());
        assert_eq!(err.to_string(), "Unknown or incomplete command");
    }

    #[test]
    fn test_command_error_message() {
        let err = CommandError::failed("You have no home named 'base'");
        assert_eq!(err.message(), "You have no home named 'base'");
        assert!(!err.is_syntax());

        let err: CommandError = SyntaxErrorKind::UnknownCommand.into();
        assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::UnknownCommand));
    }

    #[test]
    fn test_internal_error_keeps_source() {
        let err = CommandError::internal(anyhow::anyhow!("disk full"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.message().contains("disk full"));
    }

    #[test]
    fn test_context_error_becomes_internal() {
        let err: CommandError = ContextError::NoSuchElement { key: "target".into() }.into();
        assert!(matches!(err, CommandError::Internal(_)));
        assert!(err.message().contains("target"));
    }
}
