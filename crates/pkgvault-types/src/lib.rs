//! Foundation types for pkgvault.
//!
//! Every storage backend and the registry server speak in terms of the types
//! defined here.
//!
//! # Key Types
//!
//! - [`Manifest`] -- full package metadata: versions, dist-tags, extension fields
//! - [`PackageName`] -- a validated package name, optionally scoped (`@scope/name`)
//! - [`TarballName`] -- a validated tarball filename scoped under a package

pub mod error;
pub mod manifest;
pub mod names;

pub use error::TypeError;
pub use manifest::{Manifest, DIST_TAGS, LATEST_TAG};
pub use names::{validate_package_name, validate_tarball_name, PackageName, TarballName};
