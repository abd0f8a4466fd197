//! Cooperative cancellation for long-running engine operations.
//!
//! Key derivation and full-file crypt are the only blocking points in
//! the engine; interactive embedders run `open`/`save` on a worker and
//! hold the token on their own thread. The pipeline checks the token at
//! every stage boundary — a single KDF invocation itself is not
//! interruptible, so that is the cancellation latency. A cancelled
//! operation unwinds normally and every derived secret it held is
//! zeroized by drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DatabaseError;

/// Shared cancellation flag. Cloning hands out another handle to the
/// same flag; any clone may cancel.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that nobody has cancelled yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; never blocks.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Stage-boundary check used by the pipeline.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Cancelled`] once [`CancelToken::cancel`] has been
    /// called.
    pub(crate) fn checkpoint(&self) -> Result<(), DatabaseError> {
        if self.is_cancelled() {
            Err(DatabaseError::Cancelled)
        } else {
            Ok(())
        }
    }
}
