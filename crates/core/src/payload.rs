// Outbound webhook payloads
//
// A payload describes one batch: who the user is, which of their events hit
// the transition, and what they currently have running. Every enrichment step
// is best effort; a failed lookup leaves its field out instead of failing the
// payload.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::batch::NotificationBatch;
use crate::models::{Event, WebhookEventType};
use crate::time::{TimeSource, ZoneConfig};
use crate::traits::{Directory, EventStore, SshKeyStore, UserProfile};

/// Body POSTed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    /// Id of the subscription this copy is addressed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    pub event_type: WebhookEventType,
    /// When the payload was generated
    pub timestamp: DateTime<FixedOffset>,
    pub event_count: usize,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    pub events: Vec<EventInfo>,
    /// Events in progress for the user at generation time; absent if the lookup failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_resources: Option<Vec<EventInfo>>,
}

impl OutboundPayload {
    /// Copy addressed to one subscription
    pub fn for_subscription(&self, subscription_id: i64) -> Self {
        Self {
            webhook_id: Some(subscription_id.to_string()),
            ..self.clone()
        }
    }
}

/// Per-event detail record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub event_id: String,
    pub event_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    pub event_start: DateTime<FixedOffset>,
    pub event_end: DateTime<FixedOffset>,
    pub resource_id: i64,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_specs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
}

/// Assembles enriched payloads from batches
#[derive(Clone)]
pub struct PayloadBuilder {
    directory: Arc<dyn Directory>,
    ssh_keys: Arc<dyn SshKeyStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn TimeSource>,
}

impl PayloadBuilder {
    pub fn new(
        directory: Arc<dyn Directory>,
        ssh_keys: Arc<dyn SshKeyStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            directory,
            ssh_keys,
            events,
            clock,
        }
    }

    /// Build the payload for a batch. Never fails; missing enrichment is omitted.
    #[instrument(skip(self, batch), fields(user_id = %batch.user_id(), kind = %batch.kind(), count = batch.len()))]
    pub async fn build(&self, batch: &NotificationBatch) -> OutboundPayload {
        let user_id = batch.user_id();
        let zone = self.clock.zone();
        let mut sites = SiteNames::default();

        let profile = self.lookup_profile(user_id).await.unwrap_or_default();
        let ssh_public_key = self.lookup_ssh_key(user_id).await;

        let mut events = Vec::with_capacity(batch.len());
        for event in batch.events() {
            events.push(self.event_info(event, &zone, &mut sites).await);
        }

        let now = self.clock.now();
        let active_resources = match self.events.find_active_events_for_user(user_id, now).await {
            Ok(active) => {
                let mut infos = Vec::with_capacity(active.len());
                for event in &active {
                    infos.push(self.event_info(event, &zone, &mut sites).await);
                }
                debug!(count = infos.len(), "Found active resources for user");
                Some(infos)
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch active resources, omitting them");
                None
            }
        };

        OutboundPayload {
            webhook_id: None,
            event_type: batch.kind(),
            timestamp: zone.to_offset(&now),
            event_count: events.len(),
            user_id: user_id.to_string(),
            username: profile.username,
            email: profile.email,
            ssh_public_key,
            events,
            active_resources,
        }
    }

    async fn lookup_profile(&self, user_id: &str) -> Option<UserProfile> {
        match self.directory.user_profile(user_id).await {
            Ok(Some(profile)) => {
                debug!(
                    username = ?profile.username,
                    email = ?profile.email,
                    "Found user details"
                );
                Some(profile)
            }
            Ok(None) => {
                warn!("User details not found in directory");
                None
            }
            Err(e) => {
                error!(error = %e, "Error fetching user details");
                None
            }
        }
    }

    async fn lookup_ssh_key(&self, user_id: &str) -> Option<String> {
        match self.ssh_keys.find_ssh_key(user_id).await {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                debug!("No SSH key found for user");
                None
            }
            Err(e) => {
                error!(error = %e, "Error fetching SSH key");
                None
            }
        }
    }

    async fn event_info(&self, event: &Event, zone: &ZoneConfig, sites: &mut SiteNames) -> EventInfo {
        let resource = &event.resource;
        let site_name = match &resource.site_id {
            Some(site_id) => sites.resolve(self.directory.as_ref(), site_id).await,
            None => None,
        };

        EventInfo {
            event_id: event.id.to_string(),
            event_title: event.title.clone(),
            event_description: event.description.clone(),
            event_start: zone.to_offset(&event.start),
            event_end: zone.to_offset(&event.end),
            resource_id: resource.id,
            resource_name: resource.name.clone(),
            resource_type: resource.resource_type.as_ref().map(|t| t.name.clone()),
            resource_specs: resource.specs.clone(),
            resource_location: resource.location.clone(),
            site_id: resource.site_id.clone(),
            site_name,
        }
    }
}

/// Site name lookups memoized for the duration of one build
#[derive(Default)]
struct SiteNames {
    cache: HashMap<String, Option<String>>,
}

impl SiteNames {
    async fn resolve(&mut self, directory: &dyn Directory, site_id: &str) -> Option<String> {
        if let Some(hit) = self.cache.get(site_id) {
            return hit.clone();
        }

        let name = match directory.group_name(site_id).await {
            Ok(Some(name)) => Some(name),
            Ok(None) => {
                warn!(site_id, "Site name not found");
                None
            }
            Err(e) => {
                error!(site_id, error = %e, "Error fetching site name");
                None
            }
        };
        self.cache.insert(site_id.to_string(), name.clone());
        name
    }
}
