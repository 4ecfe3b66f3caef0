//! Outbound webhook notifications — signed JSON deliveries to subscriber
//! endpoints with bounded retries, backoff, and an append-only delivery log.

pub mod dispatcher;
pub mod signing;
pub mod store;
pub mod types;

pub use dispatcher::{DeliveryTransport, HttpOutcome, ScriptedTransport, WebhookDispatcher};
pub use store::{MemoryWebhookStore, WebhookStore};
pub use types::{DeliveryRecord, RetryPolicy, SubscriptionStatus, WebhookSubscription};
