use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancels a tarball stream from outside the task driving it.
///
/// The owning stream observes the request at its next operation and moves to
/// its `Error` state with an `Aborted` failure.
#[derive(Clone, Debug, Default)]
pub struct StreamAbortHandle {
    flag: Arc<AtomicBool>,
}

impl StreamAbortHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
