// In-memory implementations of the store and directory traits
//
// These are primarily for testing and local runs. They follow the same
// semantics as the PostgreSQL and Keycloak implementations: inclusive windows,
// all-or-nothing marker updates, not-found as None.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::RwLock;

use crate::error::{DirectoryError, StoreError};
use crate::models::{Event, Resource, Transition, WebhookEventType, WebhookSubscription};
use crate::traits::{Directory, EventStore, SshKeyStore, SubscriptionStore, UserProfile};

// ============================================================================
// Events
// ============================================================================

/// In-memory event store
///
/// # Example
///
/// ```
/// use eventhook_core::memory::InMemoryEventStore;
///
/// let store = InMemoryEventStore::new();
/// assert_eq!(store.len(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<BTreeMap<i64, Event>>,
    fail_queries: AtomicBool,
    fail_marks: AtomicBool,
    mark_calls: AtomicUsize,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: Event) {
        self.events.write().insert(event.id, event);
    }

    pub fn get(&self, id: i64) -> Option<Event> {
        self.events.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Make every query fail with a database error (for testing)
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make every marker update fail with a database error (for testing)
    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    /// Number of mark_notified calls seen so far
    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }

    fn check_queries(&self) -> Result<(), StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::database("injected query failure"));
        }
        Ok(())
    }

    fn unprocessed_between(
        &self,
        transition: Transition,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        self.check_queries()?;
        Ok(self
            .events
            .read()
            .values()
            .filter(|e| e.marker(transition).is_none())
            .filter(|e| {
                let at = e.transition_at(transition);
                *at >= from && *at <= to
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn find_unprocessed_starting_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        self.unprocessed_between(Transition::Start, from, to)
    }

    async fn find_unprocessed_ending_between(
        &self,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        self.unprocessed_between(Transition::End, from, to)
    }

    async fn find_active_events_for_user(
        &self,
        user_id: &str,
        now: DateTime<Tz>,
    ) -> Result<Vec<Event>, StoreError> {
        self.check_queries()?;
        Ok(self
            .events
            .read()
            .values()
            .filter(|e| e.user_id == user_id && e.is_active_at(&now))
            .cloned()
            .collect())
    }

    async fn mark_notified(
        &self,
        transition: Transition,
        event_ids: &[i64],
        at: DateTime<Tz>,
    ) -> Result<u64, StoreError> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(StoreError::database("injected marker failure"));
        }

        let mut events = self.events.write();
        // Validate first so a missing id leaves every marker untouched
        if let Some(missing) = event_ids.iter().find(|id| !events.contains_key(*id)) {
            return Err(StoreError::EventNotFound(*missing));
        }

        let mut marked = 0;
        for id in event_ids {
            if let Some(event) = events.get_mut(id) {
                if event.mark(transition, at) {
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// In-memory subscription registry
///
/// Needs the resource rows to evaluate type-scoped subscriptions.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    resources: RwLock<HashMap<i64, Resource>>,
    subscriptions: RwLock<Vec<WebhookSubscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&self, resource: Resource) {
        self.resources.write().insert(resource.id, resource);
    }

    pub fn add_subscription(&self, subscription: WebhookSubscription) {
        self.subscriptions.write().push(subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_matching_subscriptions(
        &self,
        resource_id: i64,
        kind: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let resources = self.resources.read();
        let Some(resource) = resources.get(&resource_id) else {
            return Ok(vec![]);
        };

        Ok(self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.matches(resource, kind))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SSH keys
// ============================================================================

#[derive(Default)]
pub struct InMemorySshKeyStore {
    keys: RwLock<HashMap<String, String>>,
    fail: AtomicBool,
}

impl InMemorySshKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, key: impl Into<String>) {
        self.keys.write().insert(user_id.into(), key.into());
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshKeyStore for InMemorySshKeyStore {
    async fn find_ssh_key(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::database("injected ssh key failure"));
        }
        Ok(self.keys.read().get(user_id).cloned())
    }
}

// ============================================================================
// Directory
// ============================================================================

/// In-memory directory with call counters
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, UserProfile>>,
    groups: RwLock<HashMap<String, String>>,
    fail: AtomicBool,
    group_lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: impl Into<String>, profile: UserProfile) {
        self.users.write().insert(user_id.into(), profile);
    }

    pub fn add_group(&self, group_id: impl Into<String>, name: impl Into<String>) {
        self.groups.write().insert(group_id.into(), name.into());
    }

    /// Make every lookup fail with a transport error
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn group_lookups(&self) -> usize {
        self.group_lookups.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DirectoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DirectoryError::Transport("injected directory failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError> {
        self.check()?;
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn group_name(&self, group_id: &str) -> Result<Option<String>, DirectoryError> {
        self.group_lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.groups.read().get(group_id).cloned())
    }
}
