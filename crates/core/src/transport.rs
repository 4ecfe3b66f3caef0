//! Notification transport contract — the channel (email, push, in-app) a
//! flow action node sends through. The engine treats transport failures as
//! node-execution errors; it never retries a send itself.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Email,
    Push,
    InApp,
}

/// A message a flow action asks the transport to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub entity_id: String,
    pub channel: MessageChannel,
    pub template: String,
    pub context: serde_json::Value,
}

/// Outcome of a send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendReceipt {
    pub fn delivered(provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Trait the notification channel implements. Sends are synchronous within a
/// node execution; they complete or fail within one scheduler step.
pub trait NotificationTransport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> SendReceipt;
}

/// In-memory transport that records sends and can be scripted to fail.
#[derive(Default)]
pub struct MemoryNotificationTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_templates: Mutex<Vec<String>>,
}

impl MemoryNotificationTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any send using this template will report failure.
    pub fn fail_template(&self, template: impl Into<String>) {
        self.fail_templates.lock().push(template.into());
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl NotificationTransport for MemoryNotificationTransport {
    fn send(&self, message: &OutboundMessage) -> SendReceipt {
        if self.fail_templates.lock().contains(&message.template) {
            return SendReceipt::failed(format!(
                "provider rejected template {}",
                message.template
            ));
        }
        self.sent.lock().push(message.clone());
        SendReceipt::delivered(format!("msg-{}", Uuid::new_v4()))
    }
}

/// Convenience: a recording transport for tests.
pub fn memory_transport() -> Arc<MemoryNotificationTransport> {
    Arc::new(MemoryNotificationTransport::new())
}
