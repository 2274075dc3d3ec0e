//! Error types for the engine.

use thiserror::Error;

/// Invalid engine configuration. Raised at construction; no engine is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Session key cannot be empty")]
    EmptySessionKey,

    #[error("Idle timeout must be greater than 0")]
    ZeroTimeout,

    #[error("Prompt lead time ({prompt_lead_ms}ms) must be shorter than the timeout ({timeout_ms}ms)")]
    PromptLeadTooLong { prompt_lead_ms: u64, timeout_ms: u64 },

    #[error("Heartbeat interval must be greater than 0")]
    ZeroHeartbeat,

    #[error("Liveness timeout ({liveness_timeout_ms}ms) must exceed the heartbeat interval ({heartbeat_ms}ms)")]
    LivenessTooShort {
        liveness_timeout_ms: u64,
        heartbeat_ms: u64,
    },

    #[error("At least one activity event kind must be enabled")]
    NoActivityEvents,
}

/// Failure talking to the shared store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    #[error("Shared store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shared store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
