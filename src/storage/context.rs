use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::storage::{StorageError, StorageResult};

/// Cancellation and deadline signal handed to every store operation.
///
/// Checked once at entry: an operation that already started runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a context that is cancelled whenever `token` is.
    pub fn child_of(token: &CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token: token.child_token(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> StorageResult<()> {
        if self.is_done() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }
}
