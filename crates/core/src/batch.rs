// Notification batches
//
// A batch is one user's events for one transition kind, notified together.

use std::collections::HashMap;

use crate::error::BatchError;
use crate::models::{Event, WebhookEventType};

/// Same-user events sharing one transition kind. Never empty.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    kind: WebhookEventType,
    user_id: String,
    events: Vec<Event>,
}

impl NotificationBatch {
    /// Validate and build a batch. Rejects empty and mixed-user input.
    pub fn new(kind: WebhookEventType, events: Vec<Event>) -> Result<Self, BatchError> {
        let first = events.first().ok_or(BatchError::Empty)?;
        let user_id = first.user_id.clone();

        if let Some(stranger) = events.iter().find(|e| e.user_id != user_id) {
            return Err(BatchError::MixedUsers {
                expected: user_id,
                found: stranger.user_id.clone(),
                event_id: stranger.id,
            });
        }

        Ok(Self {
            kind,
            user_id,
            events,
        })
    }

    pub fn kind(&self) -> WebhookEventType {
        self.kind
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_ids(&self) -> Vec<i64> {
        self.events.iter().map(|e| e.id).collect()
    }

    /// Distinct resource ids, in order of first appearance
    pub fn resource_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::new();
        for event in &self.events {
            if !ids.contains(&event.resource.id) {
                ids.push(event.resource.id);
            }
        }
        ids
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Group events by user, keeping the order in which users first appear
pub fn group_by_user(events: Vec<Event>) -> Vec<(String, Vec<Event>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Event>)> = Vec::new();

    for event in events {
        match index.get(&event.user_id) {
            Some(&slot) => groups[slot].1.push(event),
            None => {
                index.insert(event.user_id.clone(), groups.len());
                groups.push((event.user_id.clone(), vec![event]));
            }
        }
    }

    groups
}
