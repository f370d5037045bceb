use crate::error::Result;
use crate::service::MetadataEvent;
use tokio::sync::mpsc;

/// Trait for subscriptions that deliver cluster metadata changes
///
/// Delivery is at-least-once; ordering is only meaningful per key.
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    /// Start watching and return the event channel
    async fn start(&self) -> Result<mpsc::Receiver<MetadataEvent>>;

    /// Stop watching
    async fn stop(&self) -> Result<()>;

    /// Get the source name
    fn name(&self) -> &str;
}
