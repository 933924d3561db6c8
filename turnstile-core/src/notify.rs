use async_trait::async_trait;
use turnstile_shared::models::events::{IssuanceWebhook, TicketValidatedEvent};

use crate::CoreResult;

/// Best-effort outbound notifications. Failures are logged by the caller
/// and never retried.
#[async_trait]
pub trait IssuanceNotifier: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    async fn batch_issued(&self, document: &IssuanceWebhook) -> CoreResult<()>;

    async fn ticket_validated(&self, _event: &TicketValidatedEvent) -> CoreResult<()> {
        Ok(())
    }
}
