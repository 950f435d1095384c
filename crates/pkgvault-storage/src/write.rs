//! Upload session state machine.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::abort::StreamAbortHandle;
use crate::error::{StorageError, StorageResult};
use crate::traits::TarballSink;

/// Lifecycle of an upload.
///
/// `Open → Writing → Done → Success`, or `→ Error` from any non-terminal
/// state. `Success` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    /// The sink is ready; nothing written yet.
    Open,
    /// At least one chunk has been accepted.
    Writing,
    /// `done()` was called and the blob is being published.
    Done,
    /// The blob is visible to readers.
    Success,
    /// Aborted or failed; nothing is visible.
    Error,
}

impl WriteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One upload of one tarball.
///
/// Bytes go to a backend [`TarballSink`] and stay invisible until
/// [`TarballWriter::done`] publishes them. Aborting, failing, or dropping the
/// writer before that discards everything written so far.
pub struct TarballWriter {
    package: String,
    filename: String,
    state: WriteState,
    sink: Option<Box<dyn TarballSink>>,
    error: Option<StorageError>,
    abort: StreamAbortHandle,
    bytes_written: u64,
}

impl TarballWriter {
    /// Wrap a sink that is ready to accept bytes.
    pub fn new(
        package: impl Into<String>,
        filename: impl Into<String>,
        sink: Box<dyn TarballSink>,
    ) -> Self {
        let writer = Self {
            package: package.into(),
            filename: filename.into(),
            state: WriteState::Open,
            sink: Some(sink),
            error: None,
            abort: StreamAbortHandle::new(),
            bytes_written: 0,
        };
        debug!(package = %writer.package, file = %writer.filename, "tarball upload open");
        writer
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn package_name(&self) -> &str {
        &self.package
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The failure that moved the writer to `Error`, if any.
    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    /// A handle that aborts this upload from another task.
    pub fn abort_handle(&self) -> StreamAbortHandle {
        self.abort.clone()
    }

    /// Append a chunk.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> StorageResult<()> {
        self.ensure_writable().await?;
        let chunk = chunk.into();
        let len = chunk.len() as u64;
        let Some(sink) = self.sink.as_mut() else {
            return Err(StorageError::internal("upload has no sink"));
        };
        match sink.write_chunk(chunk).await {
            Ok(()) => {
                self.state = WriteState::Writing;
                self.bytes_written += len;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Signal that no more bytes follow and publish the blob.
    ///
    /// On success the writer is in `Success` and the tarball is readable.
    pub async fn done(&mut self) -> StorageResult<()> {
        self.ensure_writable().await?;
        let Some(sink) = self.sink.take() else {
            return Err(StorageError::internal("upload has no sink"));
        };
        self.state = WriteState::Done;
        match sink.commit().await {
            Ok(()) => {
                self.state = WriteState::Success;
                debug!(
                    package = %self.package,
                    file = %self.filename,
                    bytes = self.bytes_written,
                    "tarball upload complete"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Cancel the upload and discard everything written.
    ///
    /// No effect once the writer is terminal.
    pub async fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.discard().await {
                warn!(package = %self.package, file = %self.filename, error = %e, "discarding aborted upload failed");
            }
        }
        self.state = WriteState::Error;
        self.error = Some(StorageError::write_aborted());
        debug!(package = %self.package, file = %self.filename, "tarball upload aborted");
    }

    async fn ensure_writable(&mut self) -> StorageResult<()> {
        match self.state {
            WriteState::Success => {
                return Err(StorageError::internal("upload already completed"));
            }
            WriteState::Error => {
                return Err(self
                    .error
                    .clone()
                    .unwrap_or_else(|| StorageError::internal("upload failed")));
            }
            WriteState::Done => {
                return Err(StorageError::internal("upload is being finalized"));
            }
            WriteState::Open | WriteState::Writing => {}
        }
        if self.abort.is_aborted() {
            self.abort().await;
            return Err(StorageError::write_aborted());
        }
        Ok(())
    }

    fn fail(&mut self, error: StorageError) -> StorageError {
        warn!(package = %self.package, file = %self.filename, error = %error, "tarball upload failed");
        self.sink = None;
        self.state = WriteState::Error;
        self.error = Some(error.clone());
        error
    }
}

impl Drop for TarballWriter {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.sink.is_some() {
            debug!(package = %self.package, file = %self.filename, "tarball upload dropped before completion; discarding");
        }
    }
}

impl std::fmt::Debug for TarballWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarballWriter")
            .field("package", &self.package)
            .field("filename", &self.filename)
            .field("state", &self.state)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}
