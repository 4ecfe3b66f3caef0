use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `LIFECYCLE_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Minimum churn-score delta that counts as a significant change and
    /// emits a risk-changed notification.
    #[serde(default = "default_significant_risk_delta")]
    pub significant_risk_delta: u8,
    /// Score at or above which an entity's MRR counts as at-risk.
    #[serde(default = "default_at_risk_boundary")]
    pub at_risk_score_boundary: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowsConfig {
    /// Upper bound on nodes traversed in a single advance pass. Guards
    /// user-authored cyclic graphs without a delay node.
    #[serde(default = "default_max_nodes_per_advance")]
    pub max_nodes_per_advance: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum due enrollments advanced per tick.
    #[serde(default = "default_tick_batch_size")]
    pub tick_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Consecutive failed deliveries before a subscription flips to Failing.
    #[serde(default = "default_failing_threshold")]
    pub failing_threshold: u32,
    /// Delivery records retained per subscription, oldest dropped first.
    #[serde(default = "default_delivery_log_retention")]
    pub delivery_log_retention: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// Default functions
fn default_significant_risk_delta() -> u8 {
    10
}
fn default_at_risk_boundary() -> u8 {
    60
}
fn default_max_nodes_per_advance() -> u32 {
    50
}
fn default_tick_batch_size() -> usize {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_failing_threshold() -> u32 {
    5
}
fn default_delivery_log_retention() -> usize {
    500
}
fn default_queue_capacity() -> usize {
    10_000
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            significant_risk_delta: default_significant_risk_delta(),
            at_risk_score_boundary: default_at_risk_boundary(),
        }
    }
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_advance: default_max_nodes_per_advance(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_batch_size: default_tick_batch_size(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            failing_threshold: default_failing_threshold(),
            delivery_log_retention: default_delivery_log_retention(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            flows: FlowsConfig::default(),
            scheduler: SchedulerConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LIFECYCLE_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scoring.significant_risk_delta, 10);
        assert_eq!(config.flows.max_nodes_per_advance, 50);
        assert_eq!(config.webhooks.max_attempts, 3);
        assert_eq!(config.webhooks.failing_threshold, 5);
    }
}
