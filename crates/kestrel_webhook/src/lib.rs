//! # Kestrel Webhook
//!
//! An [`EventPublisher`] that POSTs job events to HTTP receivers.
//!
//! Each request carries a JSON array holding a single [`WebhookPayload`].
//!
//! ## Example
//!
//! ```no_run
//!  use kestrel_core::prelude::*;
//!  use kestrel_webhook::WebhookClient;
//!
//!  async fn run(event: JobEvent) -> Result<(), PublishError> {
//!     let client = WebhookClient::new();
//!     client.publish("http://localhost:7071/api/bugs", &event, None).await
//! }
//! ```

mod payload;

pub use payload::WebhookPayload;

use kestrel_core::prelude::*;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Clone, Default)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl EventPublisher for WebhookClient {
    async fn publish(
        &self,
        url: &str,
        event: &JobEvent,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<(), PublishError> {
        let payload = WebhookPayload::new(event, metadata, chrono::Utc::now())?;

        let response = self
            .client
            .post(url)
            .json(&[&payload])
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(status.as_u16(), text));
        }

        debug!(url, id = %payload.id, event_type = %payload.subject, "Webhook delivered");
        Ok(())
    }
}
