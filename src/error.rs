//! Error types for the trading cycle orchestrator

use crate::models::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Registry / Configuration
    // =============================

    #[error("Duplicate provider: {0}")]
    DuplicateProvider(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Cycle task failed: {0}")]
    CycleTask(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why a single provider call did not produce a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    DataUnavailable,
    RateLimited,
    Unknown,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::DataUnavailable => "data_unavailable",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Per-provider failure. Always absorbed by the aggregator.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("provider '{provider}' failed ({kind}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, message)
    }

    pub fn data_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::DataUnavailable, message)
    }

    /// Map an HTTP status from an upstream feed onto a provider error kind
    pub fn from_status(provider: impl Into<String>, status: reqwest::StatusCode) -> Self {
        let kind = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderErrorKind::RateLimited
        } else {
            ProviderErrorKind::DataUnavailable
        };
        Self::new(provider, kind, format!("upstream returned {}", status))
    }
}

/// Stage-level failure of a pipeline capability. Fatal to the cycle.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("{stage} capability failed: {message}")]
pub struct CapabilityError {
    pub stage: PipelineStage,
    pub message: String,
}

impl CapabilityError {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
