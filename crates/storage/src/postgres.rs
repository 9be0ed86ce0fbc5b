//! PostgreSQL implementation of the event, subscription and SSH key stores
//!
//! - Scan queries are inclusive on both window bounds and skip marked events
//! - Marker updates are all-or-nothing and never overwrite a set marker
//! - Every instant read back is normalized to the configured zone
//! - Rows that do not form a valid event are logged and skipped

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};

use eventhook_core::models::{Event, Transition, WebhookEventType, WebhookSubscription};
use eventhook_core::traits::{EventStore, SshKeyStore, SubscriptionStore};
use eventhook_core::{StoreError, ZoneConfig};

use crate::models::{decode_events, EventRow, WebhookConfigRow};

/// PostgreSQL-backed store
///
/// # Example
///
/// ```ignore
/// use eventhook_storage::PostgresStore;
/// use eventhook_core::ZoneConfig;
///
/// let store = PostgresStore::connect("postgres://localhost/bookings", 5, ZoneConfig::utc()).await?;
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    zone: ZoneConfig,
}

impl PostgresStore {
    pub fn new(pool: PgPool, zone: ZoneConfig) -> Self {
        Self { pool, zone }
    }

    /// Open a pool against `database_url`
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        zone: ZoneConfig,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(Self::new(pool, zone))
    }

    /// Apply the embedded migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn zone(&self) -> ZoneConfig {
        self.zone
    }

    async fn fetch_events(
        &self,
        sql: &str,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(sql)
            .bind(from.with_timezone(&Utc))
            .bind(to.with_timezone(&Utc))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to query events: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(decode_events(rows, &self.zone))
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    #[instrument(skip(self))]
    async fn find_unprocessed_starting_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "{} WHERE e.start_notified_at IS NULL AND e.start_time >= $1 AND e.start_time <= $2",
            EventRow::SELECT
        );
        let events = self.fetch_events(&sql, from, to).await?;
        debug!(count = events.len(), "Fetched unprocessed starting events");
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn find_unprocessed_ending_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "{} WHERE e.end_notified_at IS NULL AND e.end_time >= $1 AND e.end_time <= $2",
            EventRow::SELECT
        );
        let events = self.fetch_events(&sql, from, to).await?;
        debug!(count = events.len(), "Fetched unprocessed ending events");
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn find_active_events_for_user(
        &self,
        user_id: &str,
        now: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "{} WHERE e.keycloak_id = $1 AND e.start_time <= $2 AND e.end_time > $2 ORDER BY e.start_time",
            EventRow::SELECT
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(user_id)
            .bind(now.with_timezone(&Utc))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to query active events: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(decode_events(rows, &self.zone))
    }

    #[instrument(skip(self, event_ids), fields(count = event_ids.len()))]
    async fn mark_notified(
        &self,
        transition: Transition,
        event_ids: &[i64],
        at: DateTime<Tz>,
    ) -> Result<u64, StoreError> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        // Lock the rows and make sure every id exists before touching any marker
        let found: Vec<i64> = sqlx::query("SELECT id FROM events WHERE id = ANY($1) FOR UPDATE")
            .bind(event_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .iter()
            .map(|row| row.get::<i64, _>("id"))
            .collect();

        if let Some(missing) = event_ids.iter().find(|id| !found.contains(*id)) {
            // Dropping the transaction rolls it back
            return Err(StoreError::EventNotFound(*missing));
        }

        let column = transition.marker_column();
        let sql = format!(
            "UPDATE events SET {column} = $1, updated_at = NOW() WHERE id = ANY($2) AND {column} IS NULL"
        );
        let result = sqlx::query(&sql)
            .bind(at.with_timezone(&Utc))
            .bind(event_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to mark events notified: {}", e);
                StoreError::Database(e.to_string())
            })?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%transition, marked = result.rows_affected(), "Marked events notified");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    #[instrument(skip(self))]
    async fn find_matching_subscriptions(
        &self,
        resource_id: i64,
        kind: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let rows = sqlx::query_as::<_, WebhookConfigRow>(
            r#"
            SELECT wc.id, wc.name, wc.url, wc.event_type, wc.secret, wc.enabled,
                   wc.resource_id, wc.resource_type_id
            FROM webhook_configs wc
            JOIN resources r ON r.id = $1
            WHERE wc.enabled = TRUE
              AND (wc.event_type = $2 OR wc.event_type = 'ALL')
              AND (
                    wc.resource_id = r.id
                 OR wc.resource_type_id = r.type_id
                 OR (wc.resource_id IS NULL AND wc.resource_type_id IS NULL)
              )
            ORDER BY wc.id
            "#,
        )
        .bind(resource_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to query webhook configs: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.into_iter().map(WebhookSubscription::try_from).collect()
    }
}

#[async_trait]
impl SshKeyStore for PostgresStore {
    #[instrument(skip(self))]
    async fn find_ssh_key(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT ssh_key FROM ssh_keys WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to query SSH key: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(row.map(|r| r.get::<String, _>("ssh_key")))
    }
}
