//! Download session state machine.

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::abort::StreamAbortHandle;
use crate::error::{StorageError, StorageResult};
use crate::traits::TarballSource;

/// Lifecycle of a download.
///
/// `Open → Reading → Success`, or `→ Error` on abort or medium failure.
/// A missing blob never produces a reader at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    Open,
    Reading,
    Success,
    Error,
}

impl ReadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One download of one tarball, pulled chunk by chunk.
///
/// Chunks come out in the order they were written. After `abort()` no further
/// chunk is ever returned.
pub struct TarballReader {
    package: String,
    filename: String,
    state: ReadState,
    source: Option<Box<dyn TarballSource>>,
    size: Option<u64>,
    error: Option<StorageError>,
    abort: StreamAbortHandle,
    bytes_read: u64,
}

impl TarballReader {
    pub fn new(
        package: impl Into<String>,
        filename: impl Into<String>,
        source: Box<dyn TarballSource>,
    ) -> Self {
        let size = source.size();
        Self {
            package: package.into(),
            filename: filename.into(),
            state: ReadState::Open,
            source: Some(source),
            size,
            error: None,
            abort: StreamAbortHandle::new(),
            bytes_read: 0,
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn package_name(&self) -> &str {
        &self.package
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Blob size in bytes, if the medium reported it when the stream opened.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    /// A handle that aborts this download from another task.
    pub fn abort_handle(&self) -> StreamAbortHandle {
        self.abort.clone()
    }

    /// The next chunk, or `Ok(None)` once the blob is exhausted.
    ///
    /// After an abort or a failure every call returns that same error.
    pub async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        match self.state {
            ReadState::Success => return Ok(None),
            ReadState::Error => {
                return Err(self
                    .error
                    .clone()
                    .unwrap_or_else(|| StorageError::internal("download failed")));
            }
            ReadState::Open | ReadState::Reading => {}
        }
        if self.abort.is_aborted() {
            self.abort();
            return Err(StorageError::read_aborted());
        }

        let Some(source) = self.source.as_mut() else {
            return Err(StorageError::internal("download has no source"));
        };
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                self.state = ReadState::Reading;
                self.bytes_read += chunk.len() as u64;
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.source = None;
                self.state = ReadState::Success;
                debug!(package = %self.package, file = %self.filename, bytes = self.bytes_read, "tarball download complete");
                Ok(None)
            }
            Err(e) => {
                warn!(package = %self.package, file = %self.filename, error = %e, "tarball download failed");
                self.source = None;
                self.state = ReadState::Error;
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Stop the download. No effect once the reader is terminal.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.source = None;
        self.state = ReadState::Error;
        self.error = Some(StorageError::read_aborted());
        debug!(package = %self.package, file = %self.filename, "tarball download aborted");
    }

    /// Drain the remaining chunks into one buffer.
    pub async fn read_to_end(&mut self) -> StorageResult<Bytes> {
        let capacity = self.size.unwrap_or(0).saturating_sub(self.bytes_read);
        let mut buf = BytesMut::with_capacity(usize::try_from(capacity).unwrap_or(0));
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for TarballReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarballReader")
            .field("package", &self.package)
            .field("filename", &self.filename)
            .field("state", &self.state)
            .field("size", &self.size)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}
