//! Worker error taxonomy
//!
//! Each layer has its own error enum; [`WorkerError`] folds them into the
//! categories the dispatcher acts on and renders the message reported back to
//! the task source for a failed task.

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::processors::ProcessingError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Error text reported for tasks routed to a model this worker does not have
pub const UNAVAILABLE_MESSAGE: &str = "Requested model is not available";

/// Upper bound for reported error messages, in characters
const MAX_REPORT_CHARS: usize = 500;

const TRUNCATION_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Top-level worker error
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No processor available for provider '{provider_id}'")]
    ProcessorUnavailable { provider_id: String },

    #[error("Failed to load model '{model}': {source}")]
    Construction {
        model: String,
        #[source]
        source: LlmError,
    },

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Control server error: {0}")]
    Control(#[from] warp::Error),
}

impl WorkerError {
    pub fn unavailable<S: Into<String>>(provider_id: S) -> Self {
        Self::ProcessorUnavailable {
            provider_id: provider_id.into(),
        }
    }

    pub fn construction<S: Into<String>>(model: S, source: LlmError) -> Self {
        Self::Construction {
            model: model.into(),
            source,
        }
    }

    /// Message reported to the task source for a failed task
    pub fn report_message(&self) -> String {
        match self {
            WorkerError::ProcessorUnavailable { .. } => UNAVAILABLE_MESSAGE.to_string(),
            other => sanitize_error_message(&other.to_string()),
        }
    }
}

/// Redact secrets and sensitive paths, then bound the length
pub fn sanitize_error_message(message: &str) -> String {
    let redacted = SECRET_PATTERN.replace_all(message, "${1}=***");
    let redacted = SENSITIVE_PATH_PATTERN.replace_all(&redacted, "/***REDACTED***/");

    if redacted.chars().count() <= MAX_REPORT_CHARS {
        return redacted.into_owned();
    }

    let keep = MAX_REPORT_CHARS - TRUNCATION_SUFFIX.len();
    let mut truncated: String = redacted.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
