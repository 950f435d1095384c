use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid package name {name:?}: {reason}")]
    InvalidPackageName { name: String, reason: String },

    #[error("invalid tarball name {name:?}: {reason}")]
    InvalidTarballName { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
