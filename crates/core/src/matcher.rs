// Subscription matching for batches
//
// The store resolves subscriptions per resource; a batch can span several
// resources, so results are unioned and deduplicated by subscription id.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::NotificationBatch;
use crate::error::StoreError;
use crate::models::{WebhookEventType, WebhookSubscription};
use crate::traits::SubscriptionStore;

#[derive(Clone)]
pub struct SubscriptionMatcher {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionMatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Subscriptions interested in `kind` on `resource_id`
    pub async fn for_resource(
        &self,
        resource_id: i64,
        kind: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let found = self
            .store
            .find_matching_subscriptions(resource_id, kind)
            .await?;

        // The query already filters; re-check what we can without the resource row.
        Ok(found
            .into_iter()
            .filter(|s| {
                let keep = s.enabled && s.event_type.accepts(kind);
                if !keep {
                    warn!(
                        subscription = %s.name,
                        subscription_id = s.id,
                        "Store returned a subscription that does not accept this kind, skipping"
                    );
                }
                keep
            })
            .collect())
    }

    /// Union of the subscriptions of every resource in the batch, first match wins on duplicates
    pub async fn for_batch(
        &self,
        batch: &NotificationBatch,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut matched = Vec::new();

        for resource_id in batch.resource_ids() {
            for subscription in self.for_resource(resource_id, batch.kind()).await? {
                if seen.insert(subscription.id) {
                    matched.push(subscription);
                }
            }
        }

        debug!(
            user_id = %batch.user_id(),
            kind = %batch.kind(),
            count = matched.len(),
            "Resolved subscriptions for batch"
        );

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySubscriptionStore;
    use crate::models::{Event, Resource, ResourceStatus, ResourceType};
    use crate::time::ZoneConfig;
    use chrono::{Duration, TimeZone, Utc};

    fn resource(id: i64, type_id: i64) -> Resource {
        Resource {
            id,
            name: format!("node-{}", id),
            specs: None,
            location: None,
            status: ResourceStatus::Active,
            site_id: None,
            parent_id: None,
            resource_type: Some(ResourceType {
                id: type_id,
                name: "server".to_string(),
                color: None,
                site_id: None,
                custom_parameters: None,
            }),
        }
    }

    fn subscription(id: i64, resource_id: Option<i64>, type_id: Option<i64>) -> WebhookSubscription {
        WebhookSubscription {
            id,
            name: format!("hook-{}", id),
            url: format!("http://localhost/{}", id),
            event_type: WebhookEventType::EventStart,
            secret: None,
            enabled: true,
            resource_id,
            resource_type_id: type_id,
        }
    }

    fn event(id: i64, resource: Resource) -> Event {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        Event::new(
            &ZoneConfig::utc(),
            id,
            "booking",
            None,
            start,
            start + Duration::hours(1),
            "alice",
            resource,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_batch_union_deduplicates_by_id() {
        let store = InMemorySubscriptionStore::new();
        store.add_resource(resource(1, 10));
        store.add_resource(resource(2, 10));
        store.add_subscription(subscription(100, None, None));
        store.add_subscription(subscription(101, Some(1), None));
        store.add_subscription(subscription(102, None, Some(10)));
        store.add_subscription(subscription(103, Some(3), None));

        let matcher = SubscriptionMatcher::new(Arc::new(store));
        let batch = NotificationBatch::new(
            WebhookEventType::EventStart,
            vec![event(1, resource(1, 10)), event(2, resource(2, 10))],
        )
        .unwrap();

        let ids: Vec<i64> = matcher
            .for_batch(&batch)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(ids, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn test_kind_mismatch_excluded() {
        let store = InMemorySubscriptionStore::new();
        store.add_resource(resource(1, 10));
        store.add_subscription(subscription(100, None, None));

        let matcher = SubscriptionMatcher::new(Arc::new(store));
        let found = matcher
            .for_resource(1, WebhookEventType::EventEnd)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
