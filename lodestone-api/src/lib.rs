//! lodestone-api: Shared types for the lodestone command engine
//!
//! This crate defines the declarative command descriptions consumed by the
//! managed registrar and the wire form of a per-client suggestion tree.
//! Trees travel to clients as MessagePack.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub mod wire;

pub use wire::{PropertyValue, TreePacket, WireError, WireNode, WireNodeKind};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Declarative description of a command owned by the managed registrar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Literal name (the alias for a top-level command)
    pub name: String,

    /// Short description for help text
    pub about: String,

    /// Permission node required to see or run this command
    #[serde(default)]
    pub permission: Option<String>,

    /// Parameters, in the order they are typed
    #[serde(default)]
    pub args: Vec<ArgSpec>,

    /// Nested literal subcommands
    #[serde(default)]
    pub subcommands: Vec<CommandSpec>,

    /// Hidden commands execute normally but are never sent to clients
    #[serde(default)]
    pub hidden: bool,
}

/// Parameter specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Parameter key, also the node name
    pub name: String,

    /// Grammar of the parameter
    pub kind: ArgKind,

    /// Whether this parameter must be supplied
    #[serde(default)]
    pub required: bool,

    /// Whether the parameter consumes every remaining value of its kind
    #[serde(default)]
    pub repeated: bool,

    /// Help text for this parameter
    #[serde(default)]
    pub help: String,

    /// Value used when an optional parameter is omitted
    #[serde(default)]
    pub default_value: Option<String>,

    /// Where completions for this parameter come from
    #[serde(default)]
    pub suggestions: SuggestionMode,
}

/// Grammar of a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ArgKind {
    /// A single unquoted word
    Word,
    /// A word or a double-quoted phrase
    Quoted,
    /// Everything up to the end of the line
    Greedy,
    /// A whole number with optional bounds
    Integer { min: Option<i64>, max: Option<i64> },
    /// A floating point number with optional bounds
    Float { min: Option<f64>, max: Option<f64> },
    /// `true` or `false`
    Bool,
    /// One of a fixed set of words
    Choice { values: Vec<String> },
}

impl ArgKind {
    /// Parser identifier announced to clients
    pub fn parser_id(&self) -> &'static str {
        match self {
            ArgKind::Word | ArgKind::Quoted | ArgKind::Greedy | ArgKind::Choice { .. } => {
                "brigadier:string"
            }
            ArgKind::Integer { .. } => "brigadier:integer",
            ArgKind::Float { .. } => "brigadier:double",
            ArgKind::Bool => "brigadier:bool",
        }
    }

    /// Parser properties announced to clients
    pub fn properties(&self) -> BTreeMap<String, PropertyValue> {
        let mut properties = BTreeMap::new();
        match self {
            ArgKind::Word | ArgKind::Choice { .. } => {
                properties.insert("type".into(), PropertyValue::Text("word".into()));
            }
            ArgKind::Quoted => {
                properties.insert("type".into(), PropertyValue::Text("phrase".into()));
            }
            ArgKind::Greedy => {
                properties.insert("type".into(), PropertyValue::Text("greedy".into()));
            }
            ArgKind::Integer { min, max } => {
                if let Some(min) = min {
                    properties.insert("min".into(), PropertyValue::Int(*min));
                }
                if let Some(max) = max {
                    properties.insert("max".into(), PropertyValue::Int(*max));
                }
            }
            ArgKind::Float { min, max } => {
                if let Some(min) = min {
                    properties.insert("min".into(), PropertyValue::Float(*min));
                }
                if let Some(max) = max {
                    properties.insert("max".into(), PropertyValue::Float(*max));
                }
            }
            ArgKind::Bool => {}
        }
        properties
    }

    /// Whether a value of this kind swallows the rest of the line
    pub fn is_greedy(&self) -> bool {
        matches!(self, ArgKind::Greedy)
    }
}

/// Source of completions for a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionMode {
    /// The client completes from the parser type alone
    #[default]
    Client,
    /// The client asks the server for completions
    AskServer,
}

/// Errors found while validating a [`CommandSpec`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("Command name must not be empty or contain whitespace: '{0}'")]
    InvalidName(String),

    #[error("Parameter '{arg}' is declared twice in '{command}'")]
    DuplicateArgument { command: String, arg: String },

    #[error("Required parameter '{arg}' follows an optional one in '{command}'")]
    RequiredAfterOptional { command: String, arg: String },

    #[error("Parameter '{arg}' must be the last parameter of '{command}'")]
    MustBeLast { command: String, arg: String },

    #[error("Subcommand '{sub}' is declared twice in '{command}'")]
    DuplicateSubcommand { command: String, sub: String },
}

impl CommandSpec {
    /// Create a new command spec
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            permission: None,
            args: Vec::new(),
            subcommands: Vec::new(),
            hidden: false,
        }
    }

    /// Require a permission node
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    /// Add a parameter
    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    /// Add a subcommand
    pub fn subcommand(mut self, cmd: CommandSpec) -> Self {
        self.subcommands.push(cmd);
        self
    }

    /// Keep the command out of client trees
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Check the parameter layout of this spec and all subcommands
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() || self.name.contains(char::is_whitespace) {
            return Err(SpecError::InvalidName(self.name.clone()));
        }

        let mut seen = HashSet::new();
        let mut optional_seen = false;
        for (index, arg) in self.args.iter().enumerate() {
            if !seen.insert(arg.name.as_str()) {
                return Err(SpecError::DuplicateArgument {
                    command: self.name.clone(),
                    arg: arg.name.clone(),
                });
            }
            if arg.required && optional_seen {
                return Err(SpecError::RequiredAfterOptional {
                    command: self.name.clone(),
                    arg: arg.name.clone(),
                });
            }
            optional_seen |= !arg.required;
            let last = index + 1 == self.args.len();
            if (arg.repeated || arg.kind.is_greedy()) && !last {
                return Err(SpecError::MustBeLast {
                    command: self.name.clone(),
                    arg: arg.name.clone(),
                });
            }
        }

        let mut subs = HashSet::new();
        for sub in &self.subcommands {
            if !subs.insert(sub.name.to_lowercase()) {
                return Err(SpecError::DuplicateSubcommand {
                    command: self.name.clone(),
                    sub: sub.name.clone(),
                });
            }
            sub.validate()?;
        }
        Ok(())
    }

    /// One-line usage, e.g. `home <name> [count]`
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for arg in &self.args {
            let name = if arg.repeated {
                format!("{}...", arg.name)
            } else {
                arg.name.clone()
            };
            if arg.required {
                usage.push_str(&format!(" <{}>", name));
            } else {
                usage.push_str(&format!(" [{}]", name));
            }
        }
        usage
    }
}

impl ArgSpec {
    /// Create an optional parameter of the given kind
    pub fn new(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            repeated: false,
            help: String::new(),
            default_value: None,
            suggestions: SuggestionMode::Client,
        }
    }

    /// Create a single-word parameter
    pub fn word(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Word)
    }

    /// Create a parameter capturing the rest of the line
    pub fn greedy(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Greedy)
    }

    /// Create an unbounded integer parameter
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Integer { min: None, max: None })
    }

    /// Create a choice parameter
    pub fn choice<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            ArgKind::Choice {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Set as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allow several values for this key
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Set help text
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Set default value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Ask the server for completions of this parameter
    pub fn ask_server(mut self) -> Self {
        self.suggestions = SuggestionMode::AskServer;
        self
    }
}

/// Generate help text for a declarative command
pub fn render_help(spec: &CommandSpec) -> String {
    let mut help = format!("{}\n\nUSAGE:\n  {}\n", spec.about, spec.usage());

    if !spec.args.is_empty() {
        help.push_str("\nARGUMENTS:\n");
        for arg in &spec.args {
            let required = if arg.required { " (required)" } else { "" };
            help.push_str(&format!("  {}{}\n", arg.name, required));
            if !arg.help.is_empty() {
                help.push_str(&format!("      {}\n", arg.help));
            }
            if let Some(default) = &arg.default_value {
                help.push_str(&format!("      [default: {}]\n", default));
            }
        }
    }

    let visible: Vec<&CommandSpec> = spec.subcommands.iter().filter(|s| !s.hidden).collect();
    if !visible.is_empty() {
        help.push_str("\nSUBCOMMANDS:\n");
        for sub in visible {
            help.push_str(&format!("  {}    {}\n", sub.usage(), sub.about));
        }
    }

    help
}
