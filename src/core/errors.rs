// Error types for the enrichment pipeline
//
// Using thiserror for:
// - A single classification (ErrorKind) shared by results and retries
// - Type-safe matching on gate misuse
// - Source error chaining for store and config failures

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{GateState, ItemId};

/// Serializable classification carried by every failed PhaseResult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    RateLimit,
    Timeout,
    TransientNetwork,
    Cancelled,
    Storage,
    Internal,
}

impl ErrorKind {
    /// Rate limits, timeouts and network/5xx failures are worth retrying
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::TransientNetwork
        )
    }
}

/// Outbound call errors (one external collaborator, one attempt)
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Circuit breaker open for {service}")]
    CircuitOpen { service: String },

    #[error("Cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidResponse(_) => ErrorKind::Validation,
            ServiceError::Auth(_) => ErrorKind::Auth,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::RateLimited(_) => ErrorKind::RateLimit,
            ServiceError::Timeout(_) => ErrorKind::Timeout,
            ServiceError::Network(_)
            | ServiceError::Server { .. }
            | ServiceError::CircuitOpen { .. } => ErrorKind::TransientNetwork,
            ServiceError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// An open circuit is transient but must fail fast, so it is not retried here
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::CircuitOpen { .. }) && self.kind().is_retryable()
    }

    /// Classify an HTTP status code returned by a collaborator
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => ServiceError::Validation(message),
            401 | 403 => ServiceError::Auth(message),
            404 => ServiceError::NotFound(message),
            408 => ServiceError::Timeout(Duration::ZERO),
            429 => ServiceError::RateLimited(message),
            400..=499 => ServiceError::Validation(format!("{} {}", status, message)),
            _ => ServiceError::Server { status, message },
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ServiceError::Timeout(Duration::ZERO);
        }
        if let Some(status) = err.status() {
            return ServiceError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return ServiceError::InvalidResponse(err.to_string());
        }
        ServiceError::Network(err.to_string())
    }
}

/// SelectionGate misuse (caller bugs, never retried)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateError {
    #[error("Item {item_id} is not awaiting selection (state: {state:?})")]
    InvalidState {
        item_id: ItemId,
        state: Option<GateState>,
    },

    #[error("Candidate {external_item_id} was not offered for item {item_id}")]
    UnknownCandidate {
        item_id: ItemId,
        external_item_id: String,
    },
}

/// Why one item failed one phase, as recorded in its PhaseResult
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled before completion")
    }
}

impl From<ServiceError> for ItemFailure {
    fn from(err: ServiceError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<StoreError> for ItemFailure {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::ItemNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Storage,
        };
        Self::new(kind, err.to_string())
    }
}

/// Persistence boundary errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    #[error("Failed to load items from {path}: {source}")]
    LoadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("Item snapshot deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),

    #[error("Write rejected for item {item_id}: {reason}")]
    WriteFailed { item_id: ItemId, reason: String },
}

/// Orchestration errors (whole-call failures, not per-item)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Concurrency must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Max retries must be > 0, got {0}")]
    InvalidMaxRetries(u32),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f64),

    #[error("Timeout for {0} must be > 0")]
    InvalidTimeout(&'static str),

    #[error("Invalid service URL for {name}: {value}")]
    InvalidServiceUrl { name: &'static str, value: String },

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
