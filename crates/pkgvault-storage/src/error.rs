//! Error taxonomy shared by every storage operation.

use std::fmt;
use std::io;

use pkgvault_types::TypeError;

/// Message for a manifest or tarball that does not exist.
pub const NO_SUCH_PACKAGE: &str = "no such package available";
/// Message for `create_package` on a name that already exists.
pub const PACKAGE_EXISTS: &str = "this package is already present";
/// Message for a tarball upload whose target already exists.
pub const FILE_EXISTS: &str = "file already exists";
/// Message carried by an aborted upload.
pub const WRITE_ABORTED: &str = "transmision aborted";
/// Message carried by an aborted download.
pub const READ_ABORTED: &str = "read has been aborted";

/// The four failure kinds a caller can observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Internal,
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Errors from storage operations.
///
/// Every operation resolves with exactly one of these or a value. Failures
/// raised by the medium or by caller-supplied closures are folded into
/// [`StorageError::Internal`] with the original message kept intact.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The requested manifest or tarball does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The target already exists.
    #[error("{0}")]
    Conflict(String),

    /// Unexpected failure: medium I/O, (de)serialization, or a caller closure.
    #[error("{0}")]
    Internal(String),

    /// A stream was cancelled by its owner.
    #[error("{0}")]
    Aborted(String),
}

impl StorageError {
    pub fn no_such_package() -> Self {
        Self::NotFound(NO_SUCH_PACKAGE.into())
    }

    pub fn package_exists() -> Self {
        Self::Conflict(PACKAGE_EXISTS.into())
    }

    pub fn file_exists() -> Self {
        Self::Conflict(FILE_EXISTS.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn write_aborted() -> Self {
        Self::Aborted(WRITE_ABORTED.into())
    }

    pub fn read_aborted() -> Self {
        Self::Aborted(READ_ABORTED.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }

    /// HTTP-style status code the registry layer reports for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
            Self::Aborted(_) => 400,
        }
    }

    /// The message without any kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(m) | Self::Conflict(m) | Self::Internal(m) | Self::Aborted(m) => m,
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only medium failures qualify. Aborts were requested by the caller and
    /// not-found/conflict reflect the current state of the store.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<TypeError> for StorageError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::Serialization(message) => Self::Internal(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
