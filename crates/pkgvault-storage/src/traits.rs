//! The storage contract every backend implements.
//!
//! A backend provides a [`StoragePlugin`] (the factory, holding whatever
//! backend-wide state it needs) which hands out [`PackageStorage`] handles
//! bound to one package name. Tarball transfers go through the
//! [`TarballWriter`]/[`TarballReader`] state machines, which drive a
//! backend-supplied [`TarballSink`]/[`TarballSource`].

use async_trait::async_trait;
use bytes::Bytes;
use pkgvault_types::Manifest;

use crate::error::StorageResult;
use crate::locks::PackageLockGuard;
use crate::read::TarballReader;
use crate::write::TarballWriter;

/// Backend-wide factory for per-package handles.
///
/// Implementations must be thread-safe and cheap to query. The factory does
/// not track the handles it issues.
#[async_trait]
pub trait StoragePlugin: Send + Sync {
    /// A handle bound to `name`. Never fails and has no side effects; a
    /// missing package only shows up when the handle is used.
    fn package_storage(&self, name: &str) -> Box<dyn PackageStorage>;

    /// Register `name` in the package index. Idempotent.
    async fn add(&self, name: &str) -> StorageResult<()>;

    /// Drop `name` from the package index. Returns `true` if it was present.
    async fn remove(&self, name: &str) -> StorageResult<bool>;

    /// All indexed package names, sorted.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// The registry secret, if one has been stored.
    async fn get_secret(&self) -> StorageResult<Option<String>>;

    /// Store the registry secret, replacing any previous value.
    async fn set_secret(&self, secret: &str) -> StorageResult<()>;
}

/// Manifest and tarball operations for a single package.
///
/// A handle is recreated for each request and holds no resources beyond the
/// streams it opens.
///
/// Isolation: the contract does not serialize concurrent writers. A backend
/// that wants serialized read-modify-write cycles returns a guard from
/// [`PackageStorage::lock_for_update`]; the update pipeline holds it from the
/// initial read until `persist` completes.
#[async_trait]
pub trait PackageStorage: Send + Sync {
    /// The package name this handle is bound to.
    fn package_name(&self) -> &str;

    /// Persist `manifest` only if no manifest exists yet.
    ///
    /// Fails with `Conflict` when the package is already present.
    async fn create_package(&self, manifest: &Manifest) -> StorageResult<()>;

    /// Persist `manifest` unconditionally.
    async fn save_package(&self, manifest: &Manifest) -> StorageResult<()>;

    /// The last manifest successfully written, or `NotFound`.
    async fn read_package(&self) -> StorageResult<Manifest>;

    /// Remove the manifest and its package-index entry, or `NotFound`.
    async fn delete_package(&self) -> StorageResult<()>;

    /// Open an upload session for `filename`.
    ///
    /// Fails with `Conflict` when the tarball already exists. Nothing becomes
    /// visible to readers until [`TarballWriter::done`] succeeds.
    async fn write_tarball(&self, filename: &str) -> StorageResult<TarballWriter>;

    /// Open a download session for `filename`, or `NotFound`.
    async fn read_tarball(&self, filename: &str) -> StorageResult<TarballReader>;

    /// Delete a completed tarball, or `NotFound`.
    async fn remove_tarball(&self, filename: &str) -> StorageResult<()>;

    /// Backend critical section for the update pipeline.
    ///
    /// The default provides none, which makes concurrent updates
    /// last-write-wins.
    async fn lock_for_update(&self) -> Option<PackageLockGuard> {
        None
    }
}

/// Medium side of an upload.
///
/// Dropping a sink without calling [`TarballSink::commit`] must discard every
/// byte it received.
#[async_trait]
pub trait TarballSink: Send {
    /// Append a chunk to the pending blob.
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Publish the blob. Visibility must flip from absent to complete here.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Throw away the pending blob. Backends with remote multipart state
    /// override this; the default just drops the sink.
    async fn discard(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

/// Medium side of a download.
#[async_trait]
pub trait TarballSource: Send {
    /// Total size in bytes, when the medium knows it up front.
    fn size(&self) -> Option<u64> {
        None
    }

    /// The next chunk, or `None` once the blob is exhausted.
    async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>>;
}
