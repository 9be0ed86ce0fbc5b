// Error types shared across the notification pipeline

use thiserror::Error;

/// Errors from the event store and the other persistent lookups
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// A row could not be turned into a domain value
    #[error("decode error: {0}")]
    Decode(String),

    /// Event violates the start < end invariant
    #[error("invalid event {id}: {reason}")]
    InvalidEvent { id: i64, reason: String },

    /// Event to mark was not found
    #[error("event not found: {0}")]
    EventNotFound(i64),
}

impl StoreError {
    pub fn database(msg: impl Into<String>) -> Self {
        StoreError::Database(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        StoreError::Decode(msg.into())
    }
}

/// Errors talking to the identity directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Network-level failure
    #[error("directory transport error: {0}")]
    Transport(String),

    /// Could not obtain or use an access token
    #[error("directory authentication failed: {0}")]
    Auth(String),

    /// Directory answered with an unexpected status
    #[error("directory returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Response body was not what we expected
    #[error("directory response decode error: {0}")]
    Decode(String),
}

/// A batch that must not be delivered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch contains no events")]
    Empty,

    /// Every event of a batch must belong to the same user
    #[error("batch mixes users: expected {expected}, found {found} on event {event_id}")]
    MixedUsers {
        expected: String,
        found: String,
        event_id: i64,
    },
}

/// Signing failure
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}
