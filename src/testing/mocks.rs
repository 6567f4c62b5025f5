//! Mock implementations for testing
//!
//! Provides mock TaskSource, LlmProvider and BackendFactory implementations
//! so the dispatcher and registration paths can be exercised without a
//! hosting platform or an inference server.

use crate::catalog::ModelSpec;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::llm::BackendFactory;
use crate::transport::{
    PolledTask, ProviderInfo, ProviderRegistration, Task, TaskOutcome, TaskSource, TransportError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type FetchResult = Result<Option<PolledTask>, TransportError>;

/// Build a polled task routed to `provider`
pub fn polled_task(id: i64, provider: &str, input: Value) -> PolledTask {
    PolledTask {
        task: Task {
            id,
            input: input.as_object().cloned().unwrap_or_default(),
        },
        provider: ProviderInfo {
            name: provider.to_string(),
        },
    }
}

/// Mock task source for testing
///
/// Fetches pop scripted responses and return `Ok(None)` once the script is
/// exhausted. The provider registry behaves like the real one: registering a
/// present id is a conflict and removing an absent id is not found.
#[derive(Debug)]
pub struct MockTaskSource {
    script: Mutex<VecDeque<FetchResult>>,
    fetches: AtomicUsize,
    fetch_filters: Mutex<Vec<(Vec<String>, Vec<String>)>>,
    reports: Mutex<Vec<(i64, TaskOutcome)>>,
    registered: Mutex<BTreeSet<String>>,
    register_calls: Mutex<Vec<ProviderRegistration>>,
    unregister_calls: Mutex<Vec<String>>,
    failing_providers: Mutex<HashSet<String>>,
    enabled: AtomicBool,
    fail_reports: AtomicBool,
    fail_state: AtomicBool,
    register_delay_ms: AtomicU64,
}

impl Default for MockTaskSource {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            fetch_filters: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            registered: Mutex::new(BTreeSet::new()),
            register_calls: Mutex::new(Vec::new()),
            unregister_calls: Mutex::new(Vec::new()),
            failing_providers: Mutex::new(HashSet::new()),
            enabled: AtomicBool::new(true),
            fail_reports: AtomicBool::new(false),
            fail_state: AtomicBool::new(false),
            register_delay_ms: AtomicU64::new(0),
        }
    }
}

impl MockTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        let source = Self::default();
        source.set_enabled(false);
        source
    }

    pub async fn push_task(&self, task: PolledTask) {
        self.script.lock().await.push_back(Ok(Some(task)));
    }

    pub async fn push_error(&self, error: TransportError) {
        self.script.lock().await.push_back(Err(error));
    }

    pub async fn push_empty(&self) {
        self.script.lock().await.push_back(Ok(None));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_reports(&self, fail: bool) {
        self.fail_reports.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    /// Delay every register call by `delay`
    pub fn set_register_delay(&self, delay: Duration) {
        self.register_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make register and unregister calls for `provider_id` fail with a 500
    pub async fn fail_provider(&self, provider_id: impl Into<String>) {
        self.failing_providers.lock().await.insert(provider_id.into());
    }

    /// Mark an id as already registered on the remote end
    pub async fn preregister(&self, provider_id: impl Into<String>) {
        self.registered.lock().await.insert(provider_id.into());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn fetch_filters(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.fetch_filters.lock().await.clone()
    }

    pub async fn reports(&self) -> Vec<(i64, TaskOutcome)> {
        self.reports.lock().await.clone()
    }

    pub async fn registered_ids(&self) -> Vec<String> {
        self.registered.lock().await.iter().cloned().collect()
    }

    pub async fn register_calls(&self) -> Vec<ProviderRegistration> {
        self.register_calls.lock().await.clone()
    }

    pub async fn unregister_calls(&self) -> Vec<String> {
        self.unregister_calls.lock().await.clone()
    }

    async fn check_failing(&self, provider_id: &str) -> Result<(), TransportError> {
        if self.failing_providers.lock().await.contains(provider_id) {
            return Err(TransportError::Status {
                status: 500,
                body: format!("Mock registry failure for {provider_id}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskSource for MockTaskSource {
    async fn fetch_next_task(
        &self,
        provider_ids: &[String],
        task_type_ids: &[String],
    ) -> Result<Option<PolledTask>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_filters
            .lock()
            .await
            .push((provider_ids.to_vec(), task_type_ids.to_vec()));

        self.script.lock().await.pop_front().unwrap_or(Ok(None))
    }

    async fn report_result(
        &self,
        task_id: i64,
        outcome: &TaskOutcome,
    ) -> Result<(), TransportError> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(TransportError::Network("Mock report failure".to_string()));
        }

        self.reports.lock().await.push((task_id, outcome.clone()));
        Ok(())
    }

    async fn register(&self, registration: &ProviderRegistration) -> Result<(), TransportError> {
        let delay = self.register_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.register_calls.lock().await.push(registration.clone());
        self.check_failing(&registration.id).await?;

        if self.registered.lock().await.insert(registration.id.clone()) {
            Ok(())
        } else {
            Err(TransportError::Conflict(registration.id.clone()))
        }
    }

    async fn unregister(&self, provider_id: &str) -> Result<(), TransportError> {
        self.unregister_calls
            .lock()
            .await
            .push(provider_id.to_string());
        self.check_failing(provider_id).await?;

        if self.registered.lock().await.remove(provider_id) {
            Ok(())
        } else {
            Err(TransportError::NotFound(provider_id.to_string()))
        }
    }

    async fn fetch_enabled_state(&self) -> Result<bool, TransportError> {
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(TransportError::Network("Mock state failure".to_string()));
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            should_fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub async fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone();
        self.requests.lock().await.push(request);

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Mock backend factory handing out [`MockLlmProvider`]s
#[derive(Debug, Default)]
pub struct MockBackendFactory {
    responses: Vec<String>,
    fail_first: usize,
    attempts: AtomicUsize,
    created: AtomicUsize,
}

impl MockBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backends answer every completion with one of `responses`, in turn
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses,
            ..Self::default()
        }
    }

    /// The first `n` construction attempts fail
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for MockBackendFactory {
    async fn create(&self, model: &ModelSpec) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(LlmError::ModelNotFound(format!(
                "Mock construction failure for {}",
                model.name
            )));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockLlmProvider::new(self.responses.clone())))
    }
}
