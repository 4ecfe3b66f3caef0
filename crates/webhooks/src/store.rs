//! Subscription and delivery-log persistence contract.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::error::{EngineError, EngineResult};

use crate::types::{DeliveryRecord, SubscriptionStatus, WebhookSubscription};

/// Weight of the newest delivery outcome in the rolling success rate.
const SUCCESS_RATE_ALPHA: f64 = 0.2;

pub trait WebhookStore: Send + Sync {
    fn get(&self, id: &Uuid) -> Option<WebhookSubscription>;

    fn list(&self) -> Vec<WebhookSubscription>;

    /// Active subscriptions accepting the given event type.
    fn subscriptions_for(&self, event_type: &str) -> Vec<WebhookSubscription>;

    fn upsert(&self, subscription: WebhookSubscription);

    fn set_status(&self, id: &Uuid, status: SubscriptionStatus) -> EngineResult<()>;

    /// Folds one delivery outcome into the subscription's rolling success
    /// rate and consecutive-failure streak. Returns the updated record.
    fn record_outcome(&self, id: &Uuid, success: bool) -> EngineResult<WebhookSubscription>;

    /// Appends to the bounded delivery log, dropping the oldest record once
    /// `retention` is exceeded.
    fn append_delivery(&self, record: DeliveryRecord, retention: usize);

    fn deliveries(&self, subscription_id: &Uuid) -> Vec<DeliveryRecord>;
}

/// Concurrent in-memory webhook store.
#[derive(Default)]
pub struct MemoryWebhookStore {
    subscriptions: DashMap<Uuid, WebhookSubscription>,
    deliveries: DashMap<Uuid, VecDeque<DeliveryRecord>>,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookStore for MemoryWebhookStore {
    fn get(&self, id: &Uuid) -> Option<WebhookSubscription> {
        self.subscriptions.get(id).map(|s| s.clone())
    }

    fn list(&self) -> Vec<WebhookSubscription> {
        self.subscriptions.iter().map(|s| s.value().clone()).collect()
    }

    fn subscriptions_for(&self, event_type: &str) -> Vec<WebhookSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.value().accepts(event_type))
            .map(|s| s.value().clone())
            .collect()
    }

    fn upsert(&self, subscription: WebhookSubscription) {
        self.subscriptions.insert(subscription.id, subscription);
    }

    fn set_status(&self, id: &Uuid, status: SubscriptionStatus) -> EngineResult<()> {
        let mut entry = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| EngineError::Persistence(format!("unknown subscription {id}")))?;
        entry.status = status;
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn record_outcome(&self, id: &Uuid, success: bool) -> EngineResult<WebhookSubscription> {
        let mut entry = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| EngineError::Persistence(format!("unknown subscription {id}")))?;

        let outcome = if success { 1.0 } else { 0.0 };
        entry.success_rate =
            (1.0 - SUCCESS_RATE_ALPHA) * entry.success_rate + SUCCESS_RATE_ALPHA * outcome;
        if success {
            entry.consecutive_failures = 0;
            // A delivery landing again clears the circuit-breaker signal.
            if entry.status == SubscriptionStatus::Failing {
                entry.status = SubscriptionStatus::Active;
            }
        } else {
            entry.consecutive_failures += 1;
        }
        entry.updated_at = chrono::Utc::now();
        debug!(
            subscription_id = %id,
            success,
            success_rate = entry.success_rate,
            streak = entry.consecutive_failures,
            "Recorded delivery outcome"
        );
        Ok(entry.clone())
    }

    fn append_delivery(&self, record: DeliveryRecord, retention: usize) {
        let mut log = self.deliveries.entry(record.subscription_id).or_default();
        log.push_back(record);
        while log.len() > retention {
            log.pop_front();
        }
    }

    fn deliveries(&self, subscription_id: &Uuid) -> Vec<DeliveryRecord> {
        self.deliveries
            .get(subscription_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}
