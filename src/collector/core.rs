//! Core collector trait
use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// Produces the current enriched payload on demand
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Run one collection cycle.
    ///
    /// `add_labels` and `label_defaults` are the raw comma-separated settings.
    /// Cancelling `cancel` aborts outstanding work and yields
    /// [`RelabelError::Cancelled`](crate::error::RelabelError::Cancelled).
    async fn collect(
        &self,
        cancel: &CancellationToken,
        add_labels: &str,
        label_defaults: &str,
    ) -> Result<String>;

    /// Get the collector name
    fn name(&self) -> &str;
}
