// Core traits for pluggable backends
//
// These traits allow the pipeline to be used with different backends:
// - In-memory implementations for examples and testing
// - PostgreSQL implementations for production
// - Keycloak for the identity directory

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, StoreError};
use crate::models::{Event, Transition, WebhookEventType, WebhookSubscription};

// ============================================================================
// EventStore - booking events and their notification markers
// ============================================================================

/// Queryable repository of booking events
///
/// All window bounds are inclusive on both ends. Result order carries no meaning.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events whose start lies in `[from, to]` and whose start marker is unset
    async fn find_unprocessed_starting_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Events whose end lies in `[from, to]` and whose end marker is unset
    async fn find_unprocessed_ending_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Events of `user_id` in progress at `now` (start <= now < end)
    async fn find_active_events_for_user(
        &self,
        user_id: &str,
        now: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Set the `transition` marker to `at` on every listed event, all or nothing.
    ///
    /// Markers that are already set are left untouched. Returns how many events
    /// were newly marked.
    async fn mark_notified(
        &self,
        transition: Transition,
        event_ids: &[i64],
        at: DateTime<Tz>,
    ) -> Result<u64, StoreError>;
}

// ============================================================================
// SubscriptionStore - webhook registrations
// ============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Enabled subscriptions for `kind` (or ALL) whose scope covers the resource
    async fn find_matching_subscriptions(
        &self,
        resource_id: i64,
        kind: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;
}

// ============================================================================
// SshKeyStore - users' public keys
// ============================================================================

#[async_trait]
pub trait SshKeyStore: Send + Sync {
    async fn find_ssh_key(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

// ============================================================================
// Directory - identity lookups
// ============================================================================

/// Profile attributes of a directory user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Read-only identity directory
///
/// Not-found is `Ok(None)`; errors are reserved for transport and protocol failures.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError>;

    /// Display name of a group (a site)
    async fn group_name(&self, group_id: &str) -> Result<Option<String>, DirectoryError>;
}
