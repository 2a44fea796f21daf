use crate::streaming::events::HubEvent;
use async_trait::async_trait;

/// Destination for session events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver `event` to every subscriber of the session
    async fn emit(&self, session_id: &str, event: HubEvent);

    /// Connections currently subscribed to the session
    fn subscriber_count(&self, session_id: &str) -> usize;
}
