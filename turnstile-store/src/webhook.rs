use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use turnstile_core::{CoreError, CoreResult, IssuanceNotifier};
use turnstile_shared::models::events::IssuanceWebhook;

/// POSTs the full issuance document to a fixed endpoint. One attempt, no retry.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IssuanceNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn batch_issued(&self, document: &IssuanceWebhook) -> CoreResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(document)
            .send()
            .await
            .map_err(|e| CoreError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Delivery(format!("{} responded {}", self.url, status)));
        }
        info!(
            "Webhook delivered for batch {} ({} tickets)",
            document.batch.id,
            document.tickets.len()
        );
        Ok(())
    }
}
