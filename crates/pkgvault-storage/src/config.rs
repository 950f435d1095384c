use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::local::LocalStorage;
use crate::memory::InMemoryStorage;
use crate::traits::StoragePlugin;

/// Settings for [`InMemoryStorage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of packages the index accepts.
    pub limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { limit: 1000 }
    }
}

/// Settings for [`LocalStorage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding one subdirectory per package.
    pub root: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
        }
    }
}

/// Which backend to run, with its settings.
///
/// Serialized with a `backend` tag:
///
/// ```toml
/// [storage]
/// backend = "local"
/// root = "/var/lib/pkgvault"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory(MemoryConfig),
    Local(LocalConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

impl StorageConfig {
    /// Construct the configured backend.
    pub async fn build(&self) -> StorageResult<Arc<dyn StoragePlugin>> {
        Ok(match self {
            Self::Memory(config) => Arc::new(InMemoryStorage::with_config(config.clone())),
            Self::Local(config) => Arc::new(LocalStorage::open(config.clone()).await?),
        })
    }
}
