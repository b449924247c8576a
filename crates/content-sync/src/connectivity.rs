use std::sync::Arc;

/// Answers whether the wide-area network is currently usable.
///
/// Shared by the sync engine and any collaborator that needs the same
/// notion of "online" (registration, health reporting).
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// A single check with no internal retries. Callers own the cadence.
    async fn is_online(&self) -> bool;
}

#[async_trait::async_trait]
impl<T: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<T> {
    async fn is_online(&self) -> bool {
        (**self).is_online().await
    }
}
