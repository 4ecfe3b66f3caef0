use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the engine. Callers alert differently per variant:
/// `Config` needs human fixing, `Transport` and `Persistence` are expected
/// operational noise, `Input` is reported per item and never aborts a batch.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Stage label used in per-event pipeline error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Input(_) => "input",
            EngineError::Config(_) => "config",
            EngineError::Persistence(_) => "persistence",
            EngineError::Transport(_) => "transport",
            EngineError::Serialization(_) => "serialization",
            EngineError::Internal(_) => "internal",
        }
    }
}
