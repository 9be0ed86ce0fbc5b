// Database rows (internal, converted to core domain types on read)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::warn;

use eventhook_core::models::{
    Event, Resource, ResourceStatus, ResourceType, WebhookEventType, WebhookSubscription,
};
use eventhook_core::{StoreError, ZoneConfig};

// ============================================
// Events
// ============================================

/// One event joined with its resource and resource type
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub keycloak_id: String,
    pub start_notified_at: Option<DateTime<Utc>>,
    pub end_notified_at: Option<DateTime<Utc>>,

    pub resource_id: i64,
    pub resource_name: String,
    pub resource_specs: Option<String>,
    pub resource_location: Option<String>,
    pub resource_status: String,
    pub resource_site_id: Option<String>,
    pub resource_parent_id: Option<i64>,

    pub type_id: Option<i64>,
    pub type_name: Option<String>,
    pub type_color: Option<String>,
    pub type_site_id: Option<String>,
    pub type_custom_parameters: Option<String>,
}

impl EventRow {
    /// Columns matching this row, for `FROM events e JOIN resources r ... LEFT JOIN resource_types t ...`
    pub const SELECT: &'static str = r#"
        SELECT e.id, e.title, e.description, e.start_time, e.end_time, e.keycloak_id,
               e.start_notified_at, e.end_notified_at,
               r.id AS resource_id, r.name AS resource_name, r.specs AS resource_specs,
               r.location AS resource_location, r.status AS resource_status,
               r.site_id AS resource_site_id, r.parent_id AS resource_parent_id,
               t.id AS type_id, t.name AS type_name, t.color AS type_color,
               t.site_id AS type_site_id, t.custom_parameters AS type_custom_parameters
        FROM events e
        JOIN resources r ON r.id = e.resource_id
        LEFT JOIN resource_types t ON t.id = r.type_id
    "#;

    pub fn into_event(self, zone: &ZoneConfig) -> Result<Event, StoreError> {
        let status = self
            .resource_status
            .parse::<ResourceStatus>()
            .map_err(StoreError::Decode)?;

        let resource_type = match (self.type_id, self.type_name) {
            (Some(id), Some(name)) => Some(ResourceType {
                id,
                name,
                color: self.type_color,
                site_id: self.type_site_id,
                custom_parameters: self.type_custom_parameters,
            }),
            _ => None,
        };

        let resource = Resource {
            id: self.resource_id,
            name: self.resource_name,
            specs: self.resource_specs,
            location: self.resource_location,
            status,
            site_id: self.resource_site_id,
            parent_id: self.resource_parent_id,
            resource_type,
        };

        let mut event = Event::new(
            zone,
            self.id,
            self.title,
            self.description,
            self.start_time,
            self.end_time,
            self.keycloak_id,
            resource,
        )?;
        event.start_notified_at = self.start_notified_at.map(|t| zone.normalize(&t));
        event.end_notified_at = self.end_notified_at.map(|t| zone.normalize(&t));
        Ok(event)
    }
}

/// Convert fetched rows, dropping the ones that cannot form a valid event.
///
/// The tables are written by the booking backend, so one bad row must not
/// hide the rest of a scan window.
pub fn decode_events(rows: Vec<EventRow>, zone: &ZoneConfig) -> Vec<Event> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.into_event(zone) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(event_id = id, error = %e, "Skipping undecodable event row");
                    None
                }
            }
        })
        .collect()
}

// ============================================
// Webhook configs
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WebhookConfigRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub event_type: String,
    pub secret: Option<String>,
    pub enabled: bool,
    pub resource_id: Option<i64>,
    pub resource_type_id: Option<i64>,
}

impl TryFrom<WebhookConfigRow> for WebhookSubscription {
    type Error = StoreError;

    fn try_from(row: WebhookConfigRow) -> Result<Self, Self::Error> {
        let event_type = row
            .event_type
            .parse::<WebhookEventType>()
            .map_err(StoreError::Decode)?;

        Ok(WebhookSubscription {
            id: row.id,
            name: row.name,
            url: row.url,
            event_type,
            secret: row.secret,
            enabled: row.enabled,
            resource_id: row.resource_id,
            resource_type_id: row.resource_type_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> EventRow {
        let start = Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap();
        EventRow {
            id: 7,
            title: "lab session".to_string(),
            description: None,
            start_time: start,
            end_time: start + chrono::Duration::hours(3),
            keycloak_id: "kc-1".to_string(),
            start_notified_at: Some(start),
            end_notified_at: None,
            resource_id: 3,
            resource_name: "node-3".to_string(),
            resource_specs: None,
            resource_location: None,
            resource_status: "MAINTENANCE".to_string(),
            resource_site_id: Some("site-a".to_string()),
            resource_parent_id: None,
            type_id: Some(2),
            type_name: Some("server".to_string()),
            type_color: Some("#ff0000".to_string()),
            type_site_id: None,
            type_custom_parameters: None,
        }
    }

    #[test]
    fn test_event_row_conversion_normalizes_zone() {
        let zone = ZoneConfig::parse("Europe/Rome").unwrap();
        let event = row().into_event(&zone).unwrap();

        assert_eq!(event.user_id, "kc-1");
        assert_eq!(event.resource.status, ResourceStatus::Maintenance);
        assert_eq!(event.resource.type_id(), Some(2));
        assert_eq!(event.start.timezone(), chrono_tz::Europe::Rome);
        assert_eq!(zone.format(&event.start), "2025-02-10T09:00:00+01:00");
        assert!(event.start_notified_at.is_some());
        assert!(event.end_notified_at.is_none());
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let mut bad = row();
        bad.resource_status = "BROKEN".to_string();
        assert!(matches!(
            bad.into_event(&ZoneConfig::utc()),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_events_skips_bad_rows() {
        let mut inverted = row();
        inverted.id = 8;
        inverted.end_time = inverted.start_time;

        let mut unknown_status = row();
        unknown_status.id = 9;
        unknown_status.resource_status = "RETIRED".to_string();

        let events = decode_events(vec![inverted, row(), unknown_status], &ZoneConfig::utc());
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![7]);
    }

    #[test]
    fn test_webhook_row_conversion() {
        let row = WebhookConfigRow {
            id: 1,
            name: "ops".to_string(),
            url: "https://ops.example.org/hook".to_string(),
            event_type: "ALL".to_string(),
            secret: None,
            enabled: true,
            resource_id: None,
            resource_type_id: Some(4),
        };
        let sub = WebhookSubscription::try_from(row).unwrap();
        assert_eq!(sub.event_type, WebhookEventType::All);
        assert_eq!(sub.resource_type_id, Some(4));
    }
}
