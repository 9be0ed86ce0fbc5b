// Batch notification
//
// Validates a batch, resolves its subscribers, builds the payload once and
// delivers it to every subscriber concurrently.

use futures::future::join_all;
use tracing::{debug, error, info, instrument};

use eventhook_core::models::{Event, WebhookEventType};
use eventhook_core::{BatchError, NotificationBatch, PayloadBuilder, StoreError, SubscriptionMatcher};

use crate::delivery::{DeliveryEngine, DeliveryOutcome};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Batch was refused before any delivery
    #[error("rejected batch: {0}")]
    Batch(#[from] BatchError),

    /// Subscriptions could not be resolved
    #[error("subscription lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one batch
#[derive(Debug, Clone)]
pub struct NotifyReport {
    pub kind: WebhookEventType,
    pub user_id: String,
    pub event_count: usize,
    /// (subscription id, outcome), one per matched subscription
    pub outcomes: Vec<(i64, DeliveryOutcome)>,
}

impl NotifyReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome_for(&self, subscription_id: i64) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == subscription_id)
            .map(|(_, o)| o)
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    matcher: SubscriptionMatcher,
    payloads: PayloadBuilder,
    delivery: DeliveryEngine,
}

impl WebhookNotifier {
    pub fn new(matcher: SubscriptionMatcher, payloads: PayloadBuilder, delivery: DeliveryEngine) -> Self {
        Self {
            matcher,
            payloads,
            delivery,
        }
    }

    /// Notify subscribers about `events`, which must all belong to one user
    pub async fn notify(
        &self,
        kind: WebhookEventType,
        events: Vec<Event>,
    ) -> Result<NotifyReport, NotifyError> {
        let batch = NotificationBatch::new(kind, events).map_err(|e| {
            error!(%kind, error = %e, "Rejecting notification batch");
            e
        })?;
        Ok(self.notify_batch(&batch).await?)
    }

    /// Single-event shorthand
    pub async fn notify_event(
        &self,
        kind: WebhookEventType,
        event: Event,
    ) -> Result<NotifyReport, NotifyError> {
        self.notify(kind, vec![event]).await
    }

    #[instrument(skip(self, batch), fields(user_id = %batch.user_id(), kind = %batch.kind(), events = batch.len()))]
    pub async fn notify_batch(&self, batch: &NotificationBatch) -> Result<NotifyReport, StoreError> {
        let subscriptions = self.matcher.for_batch(batch).await.map_err(|e| {
            error!(error = %e, "Failed to resolve subscriptions");
            e
        })?;

        let mut report = NotifyReport {
            kind: batch.kind(),
            user_id: batch.user_id().to_string(),
            event_count: batch.len(),
            outcomes: Vec::with_capacity(subscriptions.len()),
        };

        if subscriptions.is_empty() {
            debug!("No relevant webhooks found");
            return Ok(report);
        }

        info!(webhooks = subscriptions.len(), "Found relevant webhooks");

        let payload = self.payloads.build(batch).await;
        // Fan-out is bounded by the engine's in-flight limit
        let deliveries = subscriptions
            .iter()
            .map(|subscription| self.delivery.deliver(subscription, &payload));
        let outcomes = join_all(deliveries).await;

        report.outcomes = subscriptions
            .iter()
            .map(|s| s.id)
            .zip(outcomes)
            .collect();

        info!(
            delivered = report.delivered(),
            failed = report.failed(),
            "Batch notification finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = NotifyReport {
            kind: WebhookEventType::EventEnd,
            user_id: "alice".to_string(),
            event_count: 2,
            outcomes: vec![
                (1, DeliveryOutcome::Delivered { status: 200 }),
                (
                    2,
                    DeliveryOutcome::Failed {
                        error: "connection refused".to_string(),
                    },
                ),
                (3, DeliveryOutcome::Delivered { status: 202 }),
            ],
        };

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome_for(2),
            Some(DeliveryOutcome::Failed { .. })
        ));
        assert!(report.outcome_for(4).is_none());
    }
}
