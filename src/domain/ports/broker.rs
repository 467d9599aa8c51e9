//! Web-log broker port.

use async_trait::async_trait;

use crate::domain::error::StoreError;
use crate::domain::models::WebLogEvent;

/// Port for publishing web-log events to an external broker.
///
/// The web-log plane is advisory: publish failures are logged and the event
/// is dropped, never propagated to handlers.
#[async_trait]
pub trait LogBroker: Send + Sync {
    async fn publish(&self, event: &WebLogEvent) -> Result<(), StoreError>;
}
