//! Delivery dispatcher — resolves subscriptions, signs payloads, and drives
//! the bounded retry loop. Dispatch never blocks or fails the caller: jobs
//! are queued onto a background worker and delivered best-effort.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lifecycle_core::config::WebhookConfig;
use lifecycle_core::events::EventSink;

use crate::signing::{sign_payload, SIGNATURE_HEADER};
use crate::store::WebhookStore;
use crate::types::{DeliveryRecord, RetryPolicy, SubscriptionStatus, WebhookSubscription};

/// Header naming the event type so receivers can route before parsing.
pub const EVENT_TYPE_HEADER: &str = "X-Lifecycle-Event";

/// Result of one HTTP POST attempt.
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl HttpOutcome {
    pub fn ok(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    pub fn transport_error(error: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

/// The HTTP client contract. Production wires a real client; tests script
/// responses.
pub trait DeliveryTransport: Send + Sync {
    fn post(&self, url: &str, body: &str, headers: &[(String, String)]) -> HttpOutcome;
}

/// A captured outbound request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// In-memory transport with a scripted response sequence. Once the script
/// is exhausted every request succeeds with 200, unless a permanent status
/// was pinned.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Vec<HttpOutcome>>,
    permanent_status: Mutex<Option<u16>>,
    requests: Mutex<Vec<CapturedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes returned in order for subsequent requests.
    pub fn respond_with(&self, outcomes: Vec<HttpOutcome>) {
        let mut script = self.script.lock();
        *script = outcomes;
        script.reverse();
    }

    /// Every request responds with the given status.
    pub fn always_status(status: u16) -> Arc<Self> {
        let transport = Arc::new(Self::new());
        transport.permanent_status.lock().replace(status);
        transport
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }
}

impl DeliveryTransport for ScriptedTransport {
    fn post(&self, url: &str, body: &str, headers: &[(String, String)]) -> HttpOutcome {
        self.requests.lock().push(CapturedRequest {
            url: url.to_string(),
            body: body.to_string(),
            headers: headers.to_vec(),
        });
        if let Some(status) = *self.permanent_status.lock() {
            return HttpOutcome::ok(status);
        }
        self.script
            .lock()
            .pop()
            .unwrap_or_else(|| HttpOutcome::ok(200))
    }
}

/// One queued delivery: a payload bound for one subscription.
struct DeliveryJob {
    subscription: WebhookSubscription,
    event_type: String,
    payload: Value,
}

/// Webhook dispatcher. Construct inside a Tokio runtime; `new` spawns the
/// queue worker.
pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    transport: Arc<dyn DeliveryTransport>,
    policy: RetryPolicy,
    failing_threshold: u32,
    retention: usize,
    queue: mpsc::Sender<DeliveryJob>,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        transport: Arc<dyn DeliveryTransport>,
        config: &WebhookConfig,
    ) -> Arc<Self> {
        let (queue, mut rx) = mpsc::channel::<DeliveryJob>(config.queue_capacity);

        let dispatcher = Arc::new(Self {
            store,
            transport,
            policy: RetryPolicy {
                max_attempts: config.max_attempts,
                initial_backoff_ms: config.initial_backoff_ms,
                max_backoff_ms: config.max_backoff_ms,
                backoff_multiplier: config.backoff_multiplier,
            },
            failing_threshold: config.failing_threshold,
            retention: config.delivery_log_retention,
            queue,
        });

        let worker = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                worker
                    .deliver(&job.subscription, &job.event_type, &job.payload)
                    .await;
            }
        });

        dispatcher
    }

    /// Enqueues one delivery per matching active subscription and returns
    /// immediately. Returns the number of deliveries enqueued.
    pub fn dispatch(&self, event_type: &str, payload: Value) -> usize {
        let subscriptions = self.store.subscriptions_for(event_type);
        let mut enqueued = 0;
        for subscription in subscriptions {
            let job = DeliveryJob {
                subscription,
                event_type: event_type.to_string(),
                payload: payload.clone(),
            };
            match self.queue.try_send(job) {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    metrics::counter!("webhooks.dropped").increment(1);
                    warn!(event_type, error = %e, "Webhook delivery queue full, dropping");
                }
            }
        }
        debug!(event_type, enqueued, "Dispatched webhook event");
        enqueued
    }

    /// Delivers to every matching subscription inline, returning the final
    /// record per subscription. Used by tests and the demo driver where
    /// deterministic completion matters.
    pub async fn dispatch_sync(&self, event_type: &str, payload: Value) -> Vec<DeliveryRecord> {
        let mut finals = Vec::new();
        for subscription in self.store.subscriptions_for(event_type) {
            finals.push(self.deliver(&subscription, event_type, &payload).await);
        }
        finals
    }

    /// Runs the bounded retry loop for one subscription. Every attempt is
    /// appended to the delivery log; the overall outcome is folded into the
    /// subscription's success rate exactly once.
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event_type: &str,
        payload: &Value,
    ) -> DeliveryRecord {
        let body = payload.to_string();
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                SIGNATURE_HEADER.to_string(),
                sign_payload(&subscription.secret, &body),
            ),
            (EVENT_TYPE_HEADER.to_string(), event_type.to_string()),
        ];

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_record = None;
        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let outcome = self.transport.post(&subscription.url, &body, &headers);
            let latency_ms = started.elapsed().as_millis() as u64;

            let record = DeliveryRecord {
                id: Uuid::new_v4(),
                subscription_id: subscription.id,
                event_type: event_type.to_string(),
                payload: payload.clone(),
                attempt,
                status_code: outcome.status,
                error: outcome.error.clone(),
                latency_ms,
                success: outcome.is_success(),
                created_at: Utc::now(),
            };
            self.store.append_delivery(record.clone(), self.retention);

            if outcome.is_success() {
                metrics::counter!("webhooks.delivered").increment(1);
                if let Err(e) = self.store.record_outcome(&subscription.id, true) {
                    warn!(subscription_id = %subscription.id, error = %e, "Outcome write failed");
                }
                return record;
            }

            debug!(
                subscription_id = %subscription.id,
                attempt,
                status = ?outcome.status,
                "Webhook attempt failed"
            );
            last_record = Some(record);

            if attempt < max_attempts {
                tokio::time::sleep(self.backoff_with_jitter(attempt)).await;
            }
        }

        metrics::counter!("webhooks.failed").increment(1);
        match self.store.record_outcome(&subscription.id, false) {
            Ok(updated) => {
                if updated.consecutive_failures >= self.failing_threshold
                    && updated.status != SubscriptionStatus::Failing
                {
                    info!(
                        subscription_id = %subscription.id,
                        streak = updated.consecutive_failures,
                        "Marking subscription as failing"
                    );
                    if let Err(e) = self
                        .store
                        .set_status(&subscription.id, SubscriptionStatus::Failing)
                    {
                        warn!(subscription_id = %subscription.id, error = %e, "Status write failed");
                    }
                }
            }
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "Outcome write failed");
            }
        }

        last_record.expect("at least one attempt always runs")
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.policy.capped_backoff_ms(attempt);
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

impl EventSink for WebhookDispatcher {
    fn emit(&self, event_type: &str, payload: Value) {
        self.dispatch(event_type, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify_signature;
    use crate::store::MemoryWebhookStore;

    fn fast_config() -> WebhookConfig {
        WebhookConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            ..WebhookConfig::default()
        }
    }

    fn setup(
        transport: Arc<ScriptedTransport>,
        config: WebhookConfig,
    ) -> (Arc<MemoryWebhookStore>, Arc<WebhookDispatcher>, Uuid) {
        let store = Arc::new(MemoryWebhookStore::new());
        let subscription =
            WebhookSubscription::new("https://hooks.example.com/lifecycle", vec!["*".into()]);
        let id = subscription.id;
        store.upsert(subscription);
        let dispatcher = WebhookDispatcher::new(store.clone(), transport, &config);
        (store, dispatcher, id)
    }

    #[tokio::test]
    async fn test_persistent_500_exhausts_attempts() {
        let transport = ScriptedTransport::always_status(500);
        let (store, dispatcher, sub_id) = setup(transport, fast_config());

        let finals = dispatcher
            .dispatch_sync("risk.changed", serde_json::json!({"score": 80}))
            .await;

        assert_eq!(finals.len(), 1);
        assert!(!finals[0].success);
        assert_eq!(finals[0].attempt, 3);

        let log = store.deliveries(&sub_id);
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|r| !r.success));

        let subscription = store.get(&sub_id).unwrap();
        assert!(subscription.success_rate < 1.0);
        assert_eq!(subscription.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_failing_flip_past_threshold() {
        let transport = ScriptedTransport::always_status(500);
        let config = WebhookConfig {
            failing_threshold: 2,
            ..fast_config()
        };
        let (store, dispatcher, sub_id) = setup(transport, config);

        dispatcher
            .dispatch_sync("risk.changed", serde_json::json!({}))
            .await;
        assert_eq!(
            store.get(&sub_id).unwrap().status,
            SubscriptionStatus::Active
        );

        dispatcher
            .dispatch_sync("risk.changed", serde_json::json!({}))
            .await;
        assert_eq!(
            store.get(&sub_id).unwrap().status,
            SubscriptionStatus::Failing
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(vec![HttpOutcome::ok(503), HttpOutcome::ok(200)]);
        let (store, dispatcher, sub_id) = setup(transport, fast_config());

        let finals = dispatcher
            .dispatch_sync("lifecycle.changed", serde_json::json!({"to": "at_risk"}))
            .await;

        assert!(finals[0].success);
        assert_eq!(finals[0].attempt, 2);
        assert_eq!(store.deliveries(&sub_id).len(), 2);
        assert_eq!(store.get(&sub_id).unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_requests_are_signed() {
        let transport = Arc::new(ScriptedTransport::new());
        let (store, dispatcher, sub_id) = setup(transport.clone(), fast_config());

        dispatcher
            .dispatch_sync("segment.entered", serde_json::json!({"segment": "power-users"}))
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let signature = requests[0]
            .headers
            .iter()
            .find(|(name, _)| name == SIGNATURE_HEADER)
            .map(|(_, v)| v.clone())
            .unwrap();

        let secret = store.get(&sub_id).unwrap().secret;
        assert!(verify_signature(&secret, &requests[0].body, &signature));
    }

    #[tokio::test]
    async fn test_transport_error_counts_as_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(vec![
            HttpOutcome::transport_error("connection refused"),
            HttpOutcome::ok(200),
        ]);
        let (store, dispatcher, sub_id) = setup(transport, fast_config());

        dispatcher
            .dispatch_sync("risk.changed", serde_json::json!({}))
            .await;

        let log = store.deliveries(&sub_id);
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert_eq!(log[0].error.as_deref(), Some("connection refused"));
        assert!(log[1].success);
    }

    #[tokio::test]
    async fn test_no_matching_subscription_is_a_noop() {
        let store = Arc::new(MemoryWebhookStore::new());
        let subscription = WebhookSubscription::new(
            "https://hooks.example.com",
            vec!["lifecycle.changed".into()],
        );
        store.upsert(subscription);
        let dispatcher = WebhookDispatcher::new(
            store.clone(),
            Arc::new(ScriptedTransport::new()),
            &fast_config(),
        );

        assert_eq!(dispatcher.dispatch("risk.changed", serde_json::json!({})), 0);
    }

    #[tokio::test]
    async fn test_queued_dispatch_delivers_in_background() {
        let transport = Arc::new(ScriptedTransport::new());
        let (store, dispatcher, sub_id) = setup(transport, fast_config());

        assert_eq!(
            dispatcher.dispatch("lifecycle.changed", serde_json::json!({})),
            1
        );

        // Wait for the worker to drain the queue.
        for _ in 0..100 {
            if !store.deliveries(&sub_id).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.deliveries(&sub_id).len(), 1);
    }
}
