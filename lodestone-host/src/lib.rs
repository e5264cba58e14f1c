//! lodestone-host: runtime around the lodestone command engine
//!
//! Connects clients to a [`lodestone::CommandManager`]. Each client gets a
//! session with an ordered request queue, a pruned command tree that is
//! resent only when it changes, and permissions read from a
//! [`permission::PermissionStore`].

pub mod audit;
pub mod config;
pub mod host;
pub mod permission;
pub mod session;
pub mod transport;
pub mod watcher;

pub use config::{ConfigError, HostConfig, HostConfigBuilder, HostPresets, HostSettings};
pub use host::{Host, HostError};
pub use session::{SessionError, SessionManager};
pub use transport::{ClientTransport, MemoryTransport, TransportError};
pub use watcher::{PermissionWatcher, WatcherConfig, WatcherError};
