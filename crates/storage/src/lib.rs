// Postgres storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - PostgresStore: EventStore, SubscriptionStore and SshKeyStore over the booking tables

pub mod models;
pub mod postgres;

pub use models::{decode_events, EventRow, WebhookConfigRow};
pub use postgres::PostgresStore;
