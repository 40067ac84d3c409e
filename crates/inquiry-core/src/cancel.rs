use tokio_util::sync::CancellationToken;

/// Cooperative cancellation flag shared between a run and whoever may stop it.
/// Signalling is idempotent; in-flight calls are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}
