//! Permission grants backing connected subjects
//!
//! The engine asks a [`lodestone::Subject`] whether it holds a permission
//! node. Here that answer comes from a [`PermissionStore`]:
//!
//! ```text
//! ┌────────────────┐   has_permission   ┌──────────────────────────┐
//! │ StoredSubject  │ ─────────────────▶ │      PermissionStore     │
//! │ (per session)  │                    │ - File (JSON, reloadable)│
//! └────────────────┘                    │ - Memory                 │
//!                                       │ - ReadOnly wrapper       │
//!                                       └──────────────────────────┘
//! ```
//!
//! Grants are permission nodes such as `homes.use`. A trailing `.*` grants
//! the node and everything below it, and `*` grants everything.
//!
//! ```rust,ignore
//! use lodestone_host::permission::{MemoryPermissionStore, PermissionStore};
//!
//! let store = MemoryPermissionStore::new();
//! store.grant("alice", "lodestone.command.*")?;
//! assert!(store.has_permission("alice", "lodestone.command.home")?);
//! ```

pub mod store;
pub mod subject;

pub use store::{
    default_path, FilePermissionStore, MemoryPermissionStore, PermissionStore,
    ReadOnlyPermissionStore, StoreError, StoredPermissions,
};
pub use subject::StoredSubject;
