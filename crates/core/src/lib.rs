// Booking event notification core
//
// Everything that does not talk to the network or the database directly:
// domain entities, the time source, batching, subscription matching, payload
// assembly and signing.
//
// Key design decisions:
// - Backends (event store, subscriptions, SSH keys, directory) are traits so the
//   worker can run against PostgreSQL + Keycloak or fully in memory
// - All timestamps are DateTime<Tz> in one configured zone
// - Payload enrichment never fails the payload; missing data is omitted

pub mod batch;
pub mod error;
pub mod matcher;
pub mod models;
pub mod payload;
pub mod signature;
pub mod telemetry;
pub mod time;
pub mod traits;

// In-memory implementations for local runs and testing
pub mod memory;

// Re-exports for convenience
pub use batch::{group_by_user, NotificationBatch};
pub use error::{BatchError, DirectoryError, SignatureError, StoreError};
pub use matcher::SubscriptionMatcher;
pub use models::{
    Event, Resource, ResourceStatus, ResourceType, Transition, WebhookEventType,
    WebhookSubscription,
};
pub use payload::{EventInfo, OutboundPayload, PayloadBuilder};
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource, ZoneConfig};
pub use traits::{Directory, EventStore, SshKeyStore, SubscriptionStore, UserProfile};
