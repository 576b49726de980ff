//! Cache configuration.
//!
//! Controls the store backend, namespace names and precache list via
//! `shelfcache.toml`.

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use super::disk::DiskStore;
use super::namespace::Namespaces;
use super::store::{CacheStore, MemoryStore};

// Default values for cache configuration
pub(crate) const DEFAULT_DIRECTORY: &str = "cache";
pub(crate) const DEFAULT_PRECACHE: [&str; 3] = ["/", "/index.html", "/manifest.json"];
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Disk,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Disk => "disk",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "disk" => Ok(StoreBackend::Disk),
            other => Err(format!("unknown store backend `{other}` (expected memory|disk)")),
        }
    }
}

/// Cache configuration from `shelfcache.toml`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Where responses live.
    pub backend: StoreBackend,
    /// Root directory of the disk backend.
    pub directory: PathBuf,
    /// Static and chapter namespace names for the running version.
    pub namespaces: Namespaces,
    /// Request targets fetched into the static namespace at install.
    pub precache: Vec<String>,
    /// Responses with larger bodies are served but never stored.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            namespaces: Namespaces::default(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            directory: settings.directory.clone(),
            namespaces: settings.namespaces.clone(),
            precache: settings.precache.clone(),
            max_body_bytes: settings.max_body_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Build the configured store. The disk backend touches the filesystem
    /// lazily, on first open or write.
    pub fn open_store(&self) -> Arc<dyn CacheStore> {
        match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Disk => Arc::new(DiskStore::new(self.directory.clone())),
        }
    }

    /// Whether the store outlives the process.
    pub fn is_persistent(&self) -> bool {
        self.backend == StoreBackend::Disk
    }
}
