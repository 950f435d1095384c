//! Pluggable package storage for pkgvault.
//!
//! The registry core never touches a storage medium directly. It asks a
//! [`StoragePlugin`] for a [`PackageStorage`] handle bound to one package
//! name and performs every manifest and tarball operation through it.
//!
//! # Storage Backends
//!
//! - [`InMemoryStorage`] -- process-local maps, for tests and ephemeral registries
//! - [`LocalStorage`] -- one directory per package under a configured root
//!
//! # Streams
//!
//! Tarballs move through [`TarballWriter`] and [`TarballReader`], explicit
//! state machines wrapping a backend sink or source. An upload becomes visible
//! only after [`TarballWriter::done`]; an aborted or dropped upload leaves
//! nothing behind.
//!
//! # Updates
//!
//! [`PackageStorageExt::update_package`] runs read, transform, normalize and
//! persist as one pipeline with a single completion point.
//!
//! # Design Rules
//!
//! 1. A handle never fails to construct; a missing package surfaces on use.
//! 2. A missing manifest or tarball is always `NotFound`, never `Internal`.
//! 3. Storing over an existing tarball is a `Conflict`, never a silent replace.
//! 4. Medium failures propagate as `Internal` with the medium's message.

pub mod abort;
pub mod config;
pub mod error;
pub mod local;
pub mod locks;
pub mod memory;
pub mod read;
pub mod traits;
pub mod update;
pub mod write;

pub use abort::StreamAbortHandle;
pub use config::{LocalConfig, MemoryConfig, StorageConfig};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use local::LocalStorage;
pub use locks::{PackageLockGuard, PackageLocks};
pub use memory::InMemoryStorage;
pub use read::{ReadState, TarballReader};
pub use traits::{PackageStorage, StoragePlugin, TarballSink, TarballSource};
pub use update::{run_update, PackageStorageExt};
pub use write::{TarballWriter, WriteState};
