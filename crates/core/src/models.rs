// Domain entities
//
// Events, resources and webhook subscriptions are owned by the booking backend.
// This service only reads them, except for the two notification markers on Event.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::time::ZoneConfig;

// ============================================================================
// Webhook event types
// ============================================================================

/// Kind of change a webhook subscription can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    EventCreated,
    EventUpdated,
    EventDeleted,
    EventStart,
    EventEnd,
    ResourceCreated,
    ResourceUpdated,
    ResourceStatusChanged,
    ResourceDeleted,
    /// Wildcard: matches every kind
    All,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventCreated => "EVENT_CREATED",
            Self::EventUpdated => "EVENT_UPDATED",
            Self::EventDeleted => "EVENT_DELETED",
            Self::EventStart => "EVENT_START",
            Self::EventEnd => "EVENT_END",
            Self::ResourceCreated => "RESOURCE_CREATED",
            Self::ResourceUpdated => "RESOURCE_UPDATED",
            Self::ResourceStatusChanged => "RESOURCE_STATUS_CHANGED",
            Self::ResourceDeleted => "RESOURCE_DELETED",
            Self::All => "ALL",
        }
    }

    /// Whether a subscription registered for `self` receives `kind`
    pub fn accepts(&self, kind: WebhookEventType) -> bool {
        *self == Self::All || *self == kind
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EVENT_CREATED" => Ok(Self::EventCreated),
            "EVENT_UPDATED" => Ok(Self::EventUpdated),
            "EVENT_DELETED" => Ok(Self::EventDeleted),
            "EVENT_START" => Ok(Self::EventStart),
            "EVENT_END" => Ok(Self::EventEnd),
            "RESOURCE_CREATED" => Ok(Self::ResourceCreated),
            "RESOURCE_UPDATED" => Ok(Self::ResourceUpdated),
            "RESOURCE_STATUS_CHANGED" => Ok(Self::ResourceStatusChanged),
            "RESOURCE_DELETED" => Ok(Self::ResourceDeleted),
            "ALL" => Ok(Self::All),
            other => Err(format!("unknown webhook event type: {}", other)),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// A lifecycle transition of an event that the scanner notifies about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    End,
}

impl Transition {
    /// Webhook kind emitted for this transition
    pub fn event_type(&self) -> WebhookEventType {
        match self {
            Self::Start => WebhookEventType::EventStart,
            Self::End => WebhookEventType::EventEnd,
        }
    }

    /// Column holding this transition's marker
    pub fn marker_column(&self) -> &'static str {
        match self {
            Self::Start => "start_notified_at",
            Self::End => "end_notified_at",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    #[default]
    Active,
    Maintenance,
    Unavailable,
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "MAINTENANCE" => Ok(Self::Maintenance),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            other => Err(format!("unknown resource status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub site_id: Option<String>,
    /// JSON document describing custom parameters, stored as text
    pub custom_parameters: Option<String>,
}

/// A bookable resource. Belongs to one site (a directory group) and one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    pub specs: Option<String>,
    pub location: Option<String>,
    pub status: ResourceStatus,
    pub site_id: Option<String>,
    pub parent_id: Option<i64>,
    pub resource_type: Option<ResourceType>,
}

impl Resource {
    pub fn type_id(&self) -> Option<i64> {
        self.resource_type.as_ref().map(|t| t.id)
    }
}

// ============================================================================
// Events
// ============================================================================

/// A booking of a resource by a user for `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Directory user id of the booking owner
    pub user_id: String,
    pub resource: Resource,
    pub start_notified_at: Option<DateTime<Tz>>,
    pub end_notified_at: Option<DateTime<Tz>>,
}

impl Event {
    /// Build an event, normalizing instants to `zone` and rejecting empty intervals
    #[allow(clippy::too_many_arguments)]
    pub fn new<Z: chrono::TimeZone>(
        zone: &ZoneConfig,
        id: i64,
        title: impl Into<String>,
        description: Option<String>,
        start: DateTime<Z>,
        end: DateTime<Z>,
        user_id: impl Into<String>,
        resource: Resource,
    ) -> Result<Self, StoreError> {
        let start = zone.normalize(&start);
        let end = zone.normalize(&end);
        if start >= end {
            return Err(StoreError::InvalidEvent {
                id,
                reason: format!("start {} is not before end {}", start, end),
            });
        }

        Ok(Self {
            id,
            title: title.into(),
            description,
            start,
            end,
            user_id: user_id.into(),
            resource,
            start_notified_at: None,
            end_notified_at: None,
        })
    }

    /// Whether the event is in progress at `now` (start <= now < end)
    pub fn is_active_at(&self, now: &DateTime<Tz>) -> bool {
        self.start <= *now && *now < self.end
    }

    pub fn marker(&self, transition: Transition) -> Option<&DateTime<Tz>> {
        match transition {
            Transition::Start => self.start_notified_at.as_ref(),
            Transition::End => self.end_notified_at.as_ref(),
        }
    }

    /// Instant at which `transition` happens
    pub fn transition_at(&self, transition: Transition) -> &DateTime<Tz> {
        match transition {
            Transition::Start => &self.start,
            Transition::End => &self.end,
        }
    }

    /// Set a marker once. Markers are never moved or cleared.
    pub fn mark(&mut self, transition: Transition, at: DateTime<Tz>) -> bool {
        let slot = match transition {
            Transition::Start => &mut self.start_notified_at,
            Transition::End => &mut self.end_notified_at,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }
}

// ============================================================================
// Webhook subscriptions
// ============================================================================

/// A registered webhook endpoint and the transitions it wants to receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub event_type: WebhookEventType,
    pub secret: Option<String>,
    pub enabled: bool,
    /// Scope to a single resource
    pub resource_id: Option<i64>,
    /// Scope to every resource of one type
    pub resource_type_id: Option<i64>,
}

impl WebhookSubscription {
    /// True when neither scope field is set
    pub fn is_global(&self) -> bool {
        self.resource_id.is_none() && self.resource_type_id.is_none()
    }

    /// Scope rule: exact resource, or the resource's type, or global
    pub fn covers(&self, resource: &Resource) -> bool {
        if self.is_global() {
            return true;
        }
        if self.resource_id == Some(resource.id) {
            return true;
        }
        match (self.resource_type_id, resource.type_id()) {
            (Some(scoped), Some(actual)) => scoped == actual,
            _ => false,
        }
    }

    /// Full matching rule: enabled, kind accepted, scope covers the resource
    pub fn matches(&self, resource: &Resource, kind: WebhookEventType) -> bool {
        self.enabled && self.event_type.accepts(kind) && self.covers(resource)
    }

    /// Secret to sign with; empty secrets count as unset
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

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
                name: "gpu".to_string(),
                color: None,
                site_id: None,
                custom_parameters: None,
            }),
        }
    }

    fn subscription(
        event_type: WebhookEventType,
        resource_id: Option<i64>,
        resource_type_id: Option<i64>,
    ) -> WebhookSubscription {
        WebhookSubscription {
            id: 1,
            name: "hook".to_string(),
            url: "http://localhost/hook".to_string(),
            event_type,
            secret: None,
            enabled: true,
            resource_id,
            resource_type_id,
        }
    }

    #[test]
    fn test_event_type_roundtrip_strings() {
        for kind in [
            WebhookEventType::EventStart,
            WebhookEventType::EventEnd,
            WebhookEventType::ResourceStatusChanged,
            WebhookEventType::All,
        ] {
            assert_eq!(kind.as_str().parse::<WebhookEventType>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!("EVENT_STARTED".parse::<WebhookEventType>().is_err());
    }

    #[test]
    fn test_global_all_subscription_matches_everything() {
        let sub = subscription(WebhookEventType::All, None, None);
        assert!(sub.matches(&resource(1, 10), WebhookEventType::EventStart));
        assert!(sub.matches(&resource(2, 20), WebhookEventType::EventEnd));
    }

    #[test]
    fn test_resource_scope() {
        let sub = subscription(WebhookEventType::EventStart, Some(1), None);
        assert!(sub.matches(&resource(1, 10), WebhookEventType::EventStart));
        assert!(!sub.matches(&resource(2, 10), WebhookEventType::EventStart));
        assert!(!sub.matches(&resource(1, 10), WebhookEventType::EventEnd));
    }

    #[test]
    fn test_type_scope() {
        let sub = subscription(WebhookEventType::All, None, Some(10));
        assert!(sub.matches(&resource(1, 10), WebhookEventType::EventStart));
        assert!(sub.matches(&resource(7, 10), WebhookEventType::EventEnd));
        assert!(!sub.matches(&resource(1, 11), WebhookEventType::EventStart));
    }

    #[test]
    fn test_disabled_never_matches() {
        let mut sub = subscription(WebhookEventType::All, None, None);
        sub.enabled = false;
        assert!(!sub.matches(&resource(1, 10), WebhookEventType::EventStart));
    }

    #[test]
    fn test_empty_secret_is_unsigned() {
        let mut sub = subscription(WebhookEventType::All, None, None);
        sub.secret = Some(String::new());
        assert!(sub.signing_secret().is_none());
        sub.secret = Some("s3cret".to_string());
        assert_eq!(sub.signing_secret(), Some("s3cret"));
    }

    #[test]
    fn test_event_rejects_inverted_interval() {
        let zone = ZoneConfig::utc();
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let result = Event::new(&zone, 1, "x", None, t, t, "u1", resource(1, 10));
        assert!(matches!(result, Err(StoreError::InvalidEvent { id: 1, .. })));
    }

    #[test]
    fn test_marker_set_once() {
        let zone = ZoneConfig::utc();
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut event = Event::new(
            &zone,
            1,
            "x",
            None,
            t,
            t + chrono::Duration::hours(1),
            "u1",
            resource(1, 10),
        )
        .unwrap();

        let first = zone.normalize(&t);
        assert!(event.mark(Transition::Start, first));
        assert!(!event.mark(Transition::Start, first + chrono::Duration::minutes(1)));
        assert_eq!(event.marker(Transition::Start), Some(&first));
        assert!(event.marker(Transition::End).is_none());
    }
}
