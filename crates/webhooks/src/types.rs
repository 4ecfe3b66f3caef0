use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer endpoint subscribed to engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    /// Event types this endpoint receives; `"*"` subscribes to everything.
    pub event_types: Vec<String>,
    /// HMAC signing secret, generated once at subscription time.
    pub secret: String,
    pub status: SubscriptionStatus,
    /// Exponentially weighted delivery success rate in [0, 1].
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(url: impl Into<String>, event_types: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            event_types,
            secret: crate::signing::generate_secret(),
            status: SubscriptionStatus::Active,
            success_rate: 1.0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        self.status == SubscriptionStatus::Active
            && self
                .event_types
                .iter()
                .any(|e| e == event_type || e == "*")
    }
}

/// Circuit-breaker status of a subscription. `Failing` is a signal for the
/// owning dashboard, not an automatic unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Failing,
}

/// Bounded retry policy for a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (1-based attempt that just failed).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        ((self.initial_backoff_ms as f64) * factor).round() as u64
    }

    pub fn capped_backoff_ms(&self, attempt: u32) -> u64 {
        self.backoff_ms(attempt).min(self.max_backoff_ms)
    }
}

/// One delivery attempt, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number within one delivery.
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}
