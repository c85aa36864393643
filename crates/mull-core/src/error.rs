use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the entire Mull engine.
#[derive(Error, Debug)]
pub enum MullError {
    // ── Planner errors ─────────────────────────────────────────
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("unknown planner: {0}")]
    UnknownPlanner(String),

    // ── Model (collaborator) errors ────────────────────────────
    #[error("model error: {model}: {reason}")]
    Model {
        model: String,
        reason: String,
        retryable: bool,
    },

    #[error("model rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    // ── Handoff errors ─────────────────────────────────────────
    #[error("handoff to {target} failed: {reason}")]
    Handoff { target: String, reason: String },

    // ── Loop termination ───────────────────────────────────────
    #[error("agent reached maximum iterations ({limit})")]
    MaxIterationsExceeded {
        limit: usize,
        partial: Option<String>,
    },

    #[error("agent timed out after {limit:?}")]
    Timeout {
        limit: Duration,
        partial: Option<String>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("hook rejected: {0}")]
    Hook(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MullError>;

/// Coarse classification of a [`MullError`], carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAction,
    ToolExecution,
    Collaborator,
    MaxIterationsExceeded,
    Timeout,
    Cancelled,
    Internal,
}

impl MullError {
    /// Build a model failure; transient transport messages are marked retryable.
    pub fn model(model: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let retryable = is_transient_message(&reason);
        MullError::Model {
            model: model.into(),
            reason,
            retryable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MullError::InvalidAction(_) => ErrorKind::InvalidAction,
            MullError::ToolNotFound(_)
            | MullError::ToolExecution { .. }
            | MullError::Handoff { .. } => ErrorKind::ToolExecution,
            MullError::Model { .. } | MullError::RateLimited { .. } => ErrorKind::Collaborator,
            MullError::MaxIterationsExceeded { .. } => ErrorKind::MaxIterationsExceeded,
            MullError::Timeout { .. } => ErrorKind::Timeout,
            MullError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a collaborator failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            MullError::RateLimited { .. } => true,
            MullError::Model { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Retry-after hint in seconds, if the collaborator supplied one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            MullError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Best partial answer carried by a limit error.
    pub fn partial_answer(&self) -> Option<&str> {
        match self {
            MullError::MaxIterationsExceeded { partial, .. }
            | MullError::Timeout { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

/// Match HTTP status codes and transport failures that are transient.
fn is_transient_message(msg: &str) -> bool {
    msg.starts_with("HTTP 429")
        || msg.starts_with("HTTP 500")
        || msg.starts_with("HTTP 502")
        || msg.starts_with("HTTP 503")
        || msg.starts_with("HTTP 529")
        || msg.contains("timed out")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("overloaded")
}
