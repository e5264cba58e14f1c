//! # lodestone: command routing and client tree synchronization
//!
//! Several subsystems register commands, each through a registrar with its
//! own execution and completion model. lodestone routes every typed line to
//! the registrar owning its alias, and hands each connected client a command
//! tree pruned to what that client may use.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lodestone::{literal, CommandCause, CommandManager, ClientId, PluginId};
//!
//! let manager = CommandManager::new();
//! let owner = PluginId::new("core");
//!
//! manager.register_native(
//!     &owner,
//!     literal("ping").executes(|_| Ok(1)),
//!     &["p"],
//! )?;
//!
//! let cause = CommandCause::console();
//! let result = manager.process(&cause, "ping")?;
//! let packet = manager.client_tree_packet(ClientId::new(1), &cause);
//! ```
//!
//! ## Pieces
//!
//! - [`AliasRegistry`]: who owns which alias
//! - [`Registrar`] and its built-in variants: native, managed and raw
//! - [`Dispatcher`]: parsing, execution and completion over a tree
//! - [`PermissionCache`] and [`SuggestionTreeBuilder`]: per-client pruned
//!   trees, cached until the canonical tree changes
//! - [`CommandContext`]: typed access to parsed parameters

pub mod alias;
pub mod argument;
pub mod canonical;
pub mod cause;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod node;
pub mod reader;
pub mod registrar;
pub mod suggestion;
pub mod sync;
pub mod tracing_support;

pub use lodestone_api::{ArgKind, ArgSpec, CommandSpec, SuggestionMode, TreePacket};

pub use alias::{AliasEntry, AliasRegistry, PluginId};
pub use argument::{ArgumentValue, FromArgument};
pub use canonical::{CanonicalTree, TreeSnapshot};
pub use cause::{
    permission_matches, BlockSnapshot, CommandCause, ConsoleSubject, Location, StaticSubject,
    Subject,
};
pub use context::{CommandContext, Key};
pub use dispatcher::{Dispatcher, ParseResults};
pub use error::{CommandError, ContextError, RegistrationError, SyntaxError, SyntaxErrorKind};
pub use manager::{CommandListing, CommandManager};
pub use node::{argument, literal, CommandNode, NodeBuilder, NodeId, NodeOrigin};
pub use registrar::{
    CommandMapping, CommandResult, ManagedCommand, ManagedRegistrar, NativeRegistrar, RawCommand,
    RawRegistrar, Registrar, RegistrarKey,
};
pub use suggestion::{
    provider_fn, SharedProvider, Suggestion, SuggestionProvider, Suggestions, SuggestionsBuilder,
};
pub use sync::{ClientId, PermissionCache, SuggestionNode, SuggestionTreeBuilder};

pub use tracing_support::{init_for_tests, init_subscriber, TracingConfig, TracingFormat};
#[cfg(feature = "tracing")]
pub use tracing_support::init_subscriber_with_config;
