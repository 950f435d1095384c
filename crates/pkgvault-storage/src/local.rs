//! Filesystem storage backend.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/.pkgvault-db.json          package index + secret
//! <root>/<name>/package.json        manifest
//! <root>/<name>/<tarball>           completed tarballs
//! <root>/@scope/<name>/...          scoped packages
//! ```
//!
//! Every write goes to a temp file in the target directory and is renamed
//! into place, so readers see either the old or the new content, never a
//! torn file. Updates through the pipeline are serialized per package name.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pkgvault_types::{validate_package_name, validate_tarball_name, Manifest};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LocalConfig;
use crate::error::{StorageError, StorageResult};
use crate::locks::{PackageLockGuard, PackageLocks};
use crate::read::TarballReader;
use crate::traits::{PackageStorage, StoragePlugin, TarballSink, TarballSource};
use crate::write::TarballWriter;

const PACKAGE_FILE: &str = "package.json";
const DB_FILE: &str = ".pkgvault-db.json";
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// On-disk package index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalDatabase {
    #[serde(default)]
    list: Vec<String>,
    #[serde(default)]
    secret: Option<String>,
}

struct LocalInner {
    root: PathBuf,
    locks: PackageLocks,
    db: Mutex<()>,
}

impl LocalInner {
    fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    async fn load_db(&self) -> StorageResult<LocalDatabase> {
        match fs::read(self.db_path()).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StorageError::internal(format!("corrupt package index: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LocalDatabase::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_db(&self, db: &LocalDatabase) -> StorageResult<()> {
        let raw = serde_json::to_vec_pretty(db).map_err(|e| StorageError::internal(e.to_string()))?;
        write_atomic(&self.root, &self.db_path(), raw, false).await
    }

    /// Load, mutate and store the index under the index mutex.
    async fn modify_db<R>(&self, f: impl FnOnce(&mut LocalDatabase) -> R) -> StorageResult<R> {
        let _guard = self.db.lock().await;
        let mut db = self.load_db().await?;
        let out = f(&mut db);
        self.store_db(&db).await?;
        Ok(out)
    }

    /// Add `name` to the index. Returns whether it was newly added.
    async fn register(&self, name: &str) -> StorageResult<bool> {
        self.modify_db(|db| {
            if db.list.iter().any(|n| n == name) {
                return false;
            }
            db.list.push(name.to_string());
            db.list.sort();
            true
        })
        .await
    }

    async fn unregister(&self, name: &str) -> StorageResult<bool> {
        self.modify_db(|db| {
            let before = db.list.len();
            db.list.retain(|n| n != name);
            db.list.len() != before
        })
        .await
    }
}

/// Filesystem implementation of [`StoragePlugin`].
#[derive(Clone)]
pub struct LocalStorage {
    inner: Arc<LocalInner>,
}

impl LocalStorage {
    /// Open (or create) a store rooted at `config.root`.
    pub async fn open(config: LocalConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root).await?;
        info!(root = %config.root.display(), "using local package storage");
        Ok(Self {
            inner: Arc::new(LocalInner {
                root: config.root,
                locks: PackageLocks::new(),
                db: Mutex::new(()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("root", &self.inner.root)
            .finish()
    }
}

#[async_trait]
impl StoragePlugin for LocalStorage {
    fn package_storage(&self, name: &str) -> Box<dyn PackageStorage> {
        Box::new(LocalPackageStorage {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn add(&self, name: &str) -> StorageResult<()> {
        validate_package_name(name)?;
        self.inner.register(name).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> StorageResult<bool> {
        self.inner.unregister(name).await
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.inner.load_db().await?.list)
    }

    async fn get_secret(&self) -> StorageResult<Option<String>> {
        Ok(self.inner.load_db().await?.secret)
    }

    async fn set_secret(&self, secret: &str) -> StorageResult<()> {
        self.inner
            .modify_db(|db| db.secret = Some(secret.to_string()))
            .await
    }
}

struct LocalPackageStorage {
    name: String,
    inner: Arc<LocalInner>,
}

impl LocalPackageStorage {
    fn package_dir(&self) -> StorageResult<PathBuf> {
        validate_package_name(&self.name)?;
        Ok(self
            .name
            .split('/')
            .fold(self.inner.root.clone(), |dir, segment| dir.join(segment)))
    }

    fn manifest_path(&self) -> StorageResult<PathBuf> {
        Ok(self.package_dir()?.join(PACKAGE_FILE))
    }

    fn tarball_path(&self, filename: &str) -> StorageResult<PathBuf> {
        validate_tarball_name(filename)?;
        if filename == PACKAGE_FILE {
            return Err(StorageError::internal(format!(
                "{PACKAGE_FILE} is reserved for the manifest"
            )));
        }
        Ok(self.package_dir()?.join(filename))
    }

    /// Register the name, then write the manifest. The index entry is
    /// rolled back if it was new and the write fails, so a failed call
    /// leaves neither a manifest nor an index entry behind.
    async fn store_manifest(&self, manifest: &Manifest, clobber: bool) -> StorageResult<()> {
        let dir = self.package_dir()?;
        let raw = manifest.to_json_pretty()?;
        let added = self.inner.register(&self.name).await?;
        let written = write_atomic(&dir, &dir.join(PACKAGE_FILE), raw, !clobber).await;
        if written.is_err() && added {
            if let Err(e) = self.inner.unregister(&self.name).await {
                warn!(package = %self.name, error = %e, "index rollback failed");
            }
        }
        written
    }
}

#[async_trait]
impl PackageStorage for LocalPackageStorage {
    fn package_name(&self) -> &str {
        &self.name
    }

    async fn create_package(&self, manifest: &Manifest) -> StorageResult<()> {
        if let Err(e) = self.store_manifest(manifest, false).await {
            return Err(match e {
                StorageError::Conflict(_) => StorageError::package_exists(),
                other => other,
            });
        }
        debug!(package = %self.name, "package created");
        Ok(())
    }

    async fn save_package(&self, manifest: &Manifest) -> StorageResult<()> {
        self.store_manifest(manifest, true).await?;
        debug!(package = %self.name, "package saved");
        Ok(())
    }

    async fn read_package(&self) -> StorageResult<Manifest> {
        let raw = fs::read(self.manifest_path()?).await.map_err(not_found_or_internal)?;
        Ok(Manifest::from_json(&raw)?)
    }

    async fn delete_package(&self) -> StorageResult<()> {
        let dir = self.package_dir()?;
        let path = dir.join(PACKAGE_FILE);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::no_such_package());
        }
        // Index first: a failure here leaves the package fully intact.
        let was_listed = self.inner.unregister(&self.name).await?;
        if let Err(e) = fs::remove_file(&path).await {
            if was_listed {
                if let Err(e) = self.inner.register(&self.name).await {
                    warn!(package = %self.name, error = %e, "index rollback failed");
                }
            }
            return Err(not_found_or_internal(e));
        }
        // Only succeeds once no tarballs remain.
        if fs::remove_dir(&dir).await.is_ok() {
            debug!(package = %self.name, "removed empty package directory");
        }
        debug!(package = %self.name, "package deleted");
        Ok(())
    }

    async fn write_tarball(&self, filename: &str) -> StorageResult<TarballWriter> {
        let target = self.tarball_path(filename)?;
        if fs::try_exists(&target).await? {
            return Err(StorageError::file_exists());
        }
        let dir = self.package_dir()?;
        fs::create_dir_all(&dir).await?;

        let (file, temp) = tokio::task::spawn_blocking(move || {
            NamedTempFile::new_in(&dir).map(NamedTempFile::into_parts)
        })
        .await
        .map_err(|e| StorageError::internal(e.to_string()))??;

        let sink = LocalSink {
            file: File::from_std(file),
            temp,
            target,
        };
        Ok(TarballWriter::new(&self.name, filename, Box::new(sink)))
    }

    async fn read_tarball(&self, filename: &str) -> StorageResult<TarballReader> {
        let path = self.tarball_path(filename)?;
        let file = File::open(&path).await.map_err(not_found_or_internal)?;
        let size = file.metadata().await?.len();
        Ok(TarballReader::new(
            &self.name,
            filename,
            Box::new(LocalSource { file, size }),
        ))
    }

    async fn remove_tarball(&self, filename: &str) -> StorageResult<()> {
        let path = self.tarball_path(filename)?;
        fs::remove_file(path).await.map_err(not_found_or_internal)
    }

    async fn lock_for_update(&self) -> Option<PackageLockGuard> {
        Some(self.inner.locks.lock(&self.name).await)
    }
}

/// Streams an upload into a temp file beside its final location.
struct LocalSink {
    file: File,
    temp: TempPath,
    target: PathBuf,
}

#[async_trait]
impl TarballSink for LocalSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let Self {
            mut file,
            temp,
            target,
        } = *self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::task::spawn_blocking(move || temp.persist_noclobber(&target))
            .await
            .map_err(|e| StorageError::internal(e.to_string()))?
            .map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::file_exists()
                } else {
                    StorageError::from(e.error)
                }
            })
    }
}

struct LocalSource {
    file: File,
    size: u64,
}

#[async_trait]
impl TarballSource for LocalSource {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let n = self.file.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

fn not_found_or_internal(e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::no_such_package()
    } else {
        e.into()
    }
}

/// Write `data` to `target` through a temp file in `dir`.
///
/// With `no_clobber`, an existing target yields `Conflict` and is left
/// untouched.
async fn write_atomic(dir: &Path, target: &Path, data: Vec<u8>, no_clobber: bool) -> StorageResult<()> {
    fs::create_dir_all(dir).await?;
    let dir = dir.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> StorageResult<()> {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        let persisted = if no_clobber {
            tmp.persist_noclobber(&target)
        } else {
            tmp.persist(&target)
        };
        match persisted {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::Conflict(format!("{} already exists", target.display())))
            }
            Err(e) => {
                warn!(target = %target.display(), error = %e.error, "atomic write failed");
                Err(e.error.into())
            }
        }
    })
    .await
    .map_err(|e| StorageError::internal(e.to_string()))?
}
