//! Task source abstraction
//!
//! The worker pulls tasks from a remote queue and reports results back through
//! the [`TaskSource`] trait. The same remote end also keeps the registry of
//! provider bindings the worker advertises.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod appapi;

pub use appapi::{AppApiConfig, AppApiTaskSource};

/// Structured task input or output
pub type TaskData = Map<String, Value>;

/// A unit of work handed out by the task source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    #[serde(default)]
    pub input: TaskData,
}

/// Provider the task source routed the task to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
}

/// Response of a successful poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolledTask {
    pub task: Task,
    pub provider: ProviderInfo,
}

/// Final result of one task, as reported back
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(TaskData),
    Failure(String),
}

/// Provider registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRegistration {
    /// Externally visible provider id
    pub id: String,
    /// Human readable provider name
    pub name: String,
    pub task_type: String,
    /// Advisory runtime hint in seconds
    pub expected_runtime: u64,
}

/// Task source errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Already registered: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl TransportError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Malformed(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Conflict(_) | TransportError::NotFound(_) => false,
        }
    }
}

/// Remote task queue and provider registry
#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch the next task routed to any of the given providers and task types
    async fn fetch_next_task(
        &self,
        provider_ids: &[String],
        task_type_ids: &[String],
    ) -> Result<Option<PolledTask>, TransportError>;

    /// Report the outcome of a task
    async fn report_result(&self, task_id: i64, outcome: &TaskOutcome)
        -> Result<(), TransportError>;

    /// Register a provider binding
    async fn register(&self, registration: &ProviderRegistration) -> Result<(), TransportError>;

    /// Remove a provider binding
    async fn unregister(&self, provider_id: &str) -> Result<(), TransportError>;

    /// Whether the hosting platform currently has this worker enabled
    async fn fetch_enabled_state(&self) -> Result<bool, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_polled_task_deserialization() {
        let polled: PolledTask = serde_json::from_value(json!({
            "task": {"id": 42, "type": "core:text2text:summary", "input": {"input": "Hello"}},
            "provider": {"name": "llm2:mistral:core:text2text:summary"}
        }))
        .unwrap();

        assert_eq!(polled.task.id, 42);
        assert_eq!(polled.task.input["input"], "Hello");
        assert_eq!(polled.provider.name, "llm2:mistral:core:text2text:summary");
    }

    #[test]
    fn test_registration_uses_camel_case() {
        let registration = ProviderRegistration {
            id: "llm2:m:core:text2text".to_string(),
            name: "Local Large language Model: m".to_string(),
            task_type: "core:text2text".to_string(),
            expected_runtime: 30,
        };
        let value = serde_json::to_value(&registration).unwrap();
        assert_eq!(value["taskType"], "core:text2text");
        assert_eq!(value["expectedRuntime"], 30);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Network("timeout".to_string()).is_transient());
        assert!(TransportError::Malformed("bad json".to_string()).is_transient());
        assert!(TransportError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!TransportError::Status {
            status: 403,
            body: String::new()
        }
        .is_transient());
        assert!(!TransportError::Conflict("x".to_string()).is_transient());
    }
}
