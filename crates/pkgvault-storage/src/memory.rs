//! In-memory storage backend.
//!
//! [`InMemoryStorage`] keeps manifests (serialized as JSON, exactly as a
//! persistent backend would), tarballs, the package index and the registry
//! secret in `HashMap`s behind one `RwLock`. Data is lost when the last clone
//! is dropped.
//!
//! Isolation: every single operation is atomic with respect to the map, but
//! concurrent `update_package` calls on the same name are last-write-wins.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pkgvault_types::Manifest;
use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::error::{StorageError, StorageResult};
use crate::read::TarballReader;
use crate::traits::{PackageStorage, StoragePlugin, TarballSink, TarballSource};
use crate::write::TarballWriter;

/// Largest chunk handed out by a memory-backed download.
const READ_CHUNK_SIZE: usize = 64 * 1024;

type TarballKey = (String, String);

#[derive(Default)]
struct MemoryState {
    manifests: HashMap<String, Vec<u8>>,
    tarballs: HashMap<TarballKey, Bytes>,
    index: BTreeSet<String>,
    secret: Option<String>,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    config: MemoryConfig,
}

impl MemoryInner {
    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| StorageError::internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| StorageError::internal(format!("lock poisoned: {e}")))
    }

    /// Add `name` to the index, enforcing the package limit for new names.
    /// Only explicit registration is limited; storing a manifest never is.
    fn register(&self, state: &mut MemoryState, name: &str) -> StorageResult<()> {
        if state.index.contains(name) {
            return Ok(());
        }
        if state.index.len() >= self.config.limit {
            return Err(StorageError::internal(format!(
                "storage memory has reached limit of {} packages",
                self.config.limit
            )));
        }
        state.index.insert(name.to_string());
        Ok(())
    }
}

/// In-memory implementation of [`StoragePlugin`].
///
/// Cloning is cheap and every clone shares the same data.
#[derive(Clone)]
pub struct InMemoryStorage {
    inner: Arc<MemoryInner>,
}

impl InMemoryStorage {
    /// An empty store with the default package limit.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        info!(limit = config.limit, "using in-memory package storage");
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(MemoryState::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// Number of stored manifests.
    pub fn package_count(&self) -> usize {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .manifests
            .len()
    }

    /// Number of completed tarballs across all packages.
    pub fn tarball_count(&self) -> usize {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .tarballs
            .len()
    }

    /// Store raw bytes as a manifest, bypassing serialization.
    #[cfg(test)]
    pub(crate) fn insert_raw_manifest(&self, name: &str, raw: &[u8]) {
        let mut state = self.inner.state.write().expect("lock poisoned");
        state.manifests.insert(name.to_string(), raw.to_vec());
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("package_count", &self.package_count())
            .field("tarball_count", &self.tarball_count())
            .field("limit", &self.inner.config.limit)
            .finish()
    }
}

#[async_trait]
impl StoragePlugin for InMemoryStorage {
    fn package_storage(&self, name: &str) -> Box<dyn PackageStorage> {
        Box::new(MemoryPackageStorage {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn add(&self, name: &str) -> StorageResult<()> {
        let mut state = self.inner.write()?;
        self.inner.register(&mut state, name)
    }

    async fn remove(&self, name: &str) -> StorageResult<bool> {
        let mut state = self.inner.write()?;
        Ok(state.index.remove(name))
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let state = self.inner.read()?;
        Ok(state.index.iter().cloned().collect())
    }

    async fn get_secret(&self) -> StorageResult<Option<String>> {
        Ok(self.inner.read()?.secret.clone())
    }

    async fn set_secret(&self, secret: &str) -> StorageResult<()> {
        self.inner.write()?.secret = Some(secret.to_string());
        Ok(())
    }
}

/// Per-package handle over [`InMemoryStorage`].
struct MemoryPackageStorage {
    name: String,
    inner: Arc<MemoryInner>,
}

impl MemoryPackageStorage {
    fn key(&self, filename: &str) -> TarballKey {
        (self.name.clone(), filename.to_string())
    }
}

#[async_trait]
impl PackageStorage for MemoryPackageStorage {
    fn package_name(&self) -> &str {
        &self.name
    }

    async fn create_package(&self, manifest: &Manifest) -> StorageResult<()> {
        let raw = manifest.to_json()?;
        let mut state = self.inner.write()?;
        if state.manifests.contains_key(&self.name) {
            return Err(StorageError::package_exists());
        }
        state.index.insert(self.name.clone());
        state.manifests.insert(self.name.clone(), raw);
        debug!(package = %self.name, "package created");
        Ok(())
    }

    async fn save_package(&self, manifest: &Manifest) -> StorageResult<()> {
        let raw = manifest.to_json()?;
        let mut state = self.inner.write()?;
        state.index.insert(self.name.clone());
        state.manifests.insert(self.name.clone(), raw);
        debug!(package = %self.name, "package saved");
        Ok(())
    }

    async fn read_package(&self) -> StorageResult<Manifest> {
        let state = self.inner.read()?;
        let raw = state
            .manifests
            .get(&self.name)
            .ok_or_else(StorageError::no_such_package)?;
        Ok(Manifest::from_json(raw)?)
    }

    async fn delete_package(&self) -> StorageResult<()> {
        let mut state = self.inner.write()?;
        if state.manifests.remove(&self.name).is_none() {
            return Err(StorageError::no_such_package());
        }
        state.index.remove(&self.name);
        debug!(package = %self.name, "package deleted");
        Ok(())
    }

    async fn write_tarball(&self, filename: &str) -> StorageResult<TarballWriter> {
        let key = self.key(filename);
        if self.inner.read()?.tarballs.contains_key(&key) {
            return Err(StorageError::file_exists());
        }
        let sink = MemorySink {
            key,
            buffer: BytesMut::new(),
            inner: Arc::clone(&self.inner),
        };
        Ok(TarballWriter::new(&self.name, filename, Box::new(sink)))
    }

    async fn read_tarball(&self, filename: &str) -> StorageResult<TarballReader> {
        let data = self
            .inner
            .read()?
            .tarballs
            .get(&self.key(filename))
            .cloned()
            .ok_or_else(StorageError::no_such_package)?;
        Ok(TarballReader::new(&self.name, filename, Box::new(MemorySource { data })))
    }

    async fn remove_tarball(&self, filename: &str) -> StorageResult<()> {
        let mut state = self.inner.write()?;
        match state.tarballs.remove(&self.key(filename)) {
            Some(_) => Ok(()),
            None => Err(StorageError::no_such_package()),
        }
    }
}

/// Buffers an upload until commit.
struct MemorySink {
    key: TarballKey,
    buffer: BytesMut,
    inner: Arc<MemoryInner>,
}

#[async_trait]
impl TarballSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let Self { key, buffer, inner } = *self;
        let mut state = inner.write()?;
        if state.tarballs.contains_key(&key) {
            return Err(StorageError::file_exists());
        }
        state.tarballs.insert(key, buffer.freeze());
        Ok(())
    }
}

/// Hands out a stored blob in bounded chunks.
struct MemorySource {
    data: Bytes,
}

#[async_trait]
impl TarballSource for MemorySource {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = self.data.len().min(READ_CHUNK_SIZE);
        Ok(Some(self.data.split_to(take)))
    }
}
