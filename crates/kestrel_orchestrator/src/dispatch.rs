use crate::context::WebhookTargets;
use crate::sink::EventAggregator;
use kestrel_core::events::JobEvent;
use kestrel_core::traits::EventPublisher;
use serde_json::{Map, Value};
use tracing::warn;

/// Decides which events are forwarded to webhooks, and when.
///
/// Delivery failures are logged and never interrupt the job.
pub struct WebhookDispatcher<'a, P> {
    publisher: &'a P,
    targets: &'a WebhookTargets,
    metadata: Option<&'a Map<String, Value>>,
}

impl<'a, P: EventPublisher> WebhookDispatcher<'a, P> {
    pub fn new(
        publisher: &'a P,
        targets: &'a WebhookTargets,
        metadata: Option<&'a Map<String, Value>>,
    ) -> Self {
        Self {
            publisher,
            targets,
            metadata,
        }
    }

    /// Sends every known status, one notification each.
    pub async fn statuses(&self, aggregator: &EventAggregator) -> usize {
        let Some(url) = &self.targets.job_status else {
            return 0;
        };
        let mut sent = 0;
        for status in aggregator.statuses() {
            if self.send(url, &JobEvent::JobStatus(status.clone())).await {
                sent += 1;
            }
        }
        sent
    }

    /// Sends every bug, one notification each.
    pub async fn bugs(&self, aggregator: &EventAggregator) -> usize {
        let Some(url) = &self.targets.bug_found else {
            return 0;
        };
        let mut sent = 0;
        for bug in aggregator.bugs() {
            if self.send(url, &JobEvent::BugFound(bug.clone())).await {
                sent += 1;
            }
        }
        sent
    }

    async fn send(&self, url: &str, event: &JobEvent) -> bool {
        match self.publisher.publish(url, event, self.metadata).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url, event_type = event.event_type(), agent = event.agent_name(), "Failed to send webhook: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
