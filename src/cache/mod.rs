//! Shelfcache response store.
//!
//! Responses are grouped in named namespaces:
//!
//! - **static** namespace: versioned (`{prefix}-{version}`), pruned whenever the
//!   version changes.
//! - **chapter** namespace: stable across versions, cleared only on request.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "disk"
//! directory = "cache"
//! static_prefix = "shelfcache-static"
//! version = "v1"
//! chapter_namespace = "shelfcache-chapters"
//! ```

pub(crate) mod config;
mod disk;
mod keys;
mod lock;
pub(crate) mod namespace;
mod store;

pub use config::{CacheConfig, StoreBackend};
pub use disk::DiskStore;
pub use keys::{KeyError, RequestKey};
pub use namespace::{NamespaceError, NamespaceName, Namespaces};
pub use store::{CacheStore, CachedResponse, MemoryStore, StoreError, is_hop_by_hop};
