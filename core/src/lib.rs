//! DeepStore: a path-addressed state store.
//!
//! State is a single JSON tree. Writes address a node by dot path
//! (`"user.profile.name"`); every write is recorded for undo/redo, run
//! through middleware, broadcast to subscribers, and optionally persisted
//! in part or in full.
//!
//! # Modules
//!
//! - [`path`]: dot-path lookup, write and merge over `serde_json::Value`
//! - [`hash`]: canonical JSON and stable content hashes
//! - [`history`]: undo/redo stacks of state snapshots
//! - [`selector`]: `path:alias` selection and shallow comparison
//! - [`persist`]: storage adapters, codec, versioning and migration
//! - [`plugin`]: middleware chain, computed values, plugin hook
//! - [`config`]: declarative settings and the options builder
//! - [`engine`]: the `Store` itself
//! - [`error`]: error types

pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod history;
pub mod path;
pub mod persist;
pub mod plugin;
pub mod selector;

pub use config::{StoreOptions, StoreSettings};
pub use engine::{create_store, Store, Subscription, Update};
pub use error::{BoxError, StorageError, StoreError};
pub use path::{get_nested_value, set_nested_value};
pub use persist::{create_persist_config, PersistConfig, PersistOption};
pub use plugin::{Middleware, Plugin};
pub use selector::Selector;
