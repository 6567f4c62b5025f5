//! Local inference server provider
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint as exposed by
//! llama.cpp style servers running next to the worker.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delays before each retry attempt
const RETRY_DELAYS_MS: [u64; 3] = [100, 200, 300];

/// Device the inference backend runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "cuda" => Ok(ComputeDevice::Cuda),
            other => Err(format!("unknown compute device '{other}'")),
        }
    }
}

/// Local provider configuration
#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub compute_device: ComputeDevice,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(600),
            compute_device: ComputeDevice::Cpu,
        }
    }
}

/// Local inference provider implementation
pub struct LocalProvider {
    config: LocalProviderConfig,
    client: Client,
}

impl LocalProvider {
    /// Create a new local provider
    pub fn new(config: LocalProviderConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::NotConfigured(
                "inference server URL is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn compute_device(&self) -> ComputeDevice {
        self.config.compute_device
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert completion request to wire format (pure function)
    fn convert_request(request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop_sequences.clone(),
        }
    }

    fn convert_message(message: &Message) -> ChatMessage {
        ChatMessage {
            role: match message.role {
                MessageRole::System => "system".to_string(),
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: Some(message.content.clone()),
        }
    }

    /// Parse completion response (pure function)
    fn parse_response(
        response: ChatCompletionResponse,
        request: &CompletionRequest,
        metadata: std::collections::HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_string()))?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: response.model.unwrap_or_else(|| request.model.clone()),
            usage,
            finish_reason: Self::convert_finish_reason(choice.finish_reason.as_deref()),
            metadata,
        })
    }

    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    /// Network failures and server-side errors are worth retrying
    fn should_retry(error: &LlmError) -> bool {
        match error {
            LlmError::NetworkError(_) => true,
            LlmError::ApiError(msg) => msg.starts_with("server error"),
            _ => false,
        }
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            estimated_tokens = request.estimated_tokens(),
            device = %self.config.compute_device,
            "Sending completion request"
        );

        let wire_request = Self::convert_request(&request);
        let mut metadata = request.metadata.clone();
        metadata.insert(
            "compute_device".to_string(),
            self.config.compute_device.to_string(),
        );

        let mut last_error = None;
        for (attempt, &delay_ms) in std::iter::once(&0u64)
            .chain(RETRY_DELAYS_MS.iter())
            .enumerate()
        {
            if attempt > 0 {
                debug!(attempt, delay_ms, "Retrying completion request");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.send_once(&wire_request).await {
                Ok(response) => {
                    let response = Self::parse_response(response, &request, metadata)?;
                    debug!(
                        total_tokens = response.usage.total_tokens,
                        finish_reason = ?response.finish_reason,
                        "Completion finished"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Completion attempt failed");
                    if !Self::should_retry(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("Completion request failed after all retries");
        Err(last_error
            .unwrap_or_else(|| LlmError::NetworkError("all retry attempts failed".to_string())))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .authorize(self.client.get(self.endpoint("models")))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(
                base_url = %self.config.base_url,
                device = %self.config.compute_device,
                "Inference backend is ready"
            );
            Ok(())
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(LlmError::AuthenticationFailed(
                "inference server rejected credentials".to_string(),
            ))
        } else {
            Err(LlmError::ApiError(format!(
                "health check returned {status}"
            )))
        }
    }
}

impl LocalProvider {
    /// Make a single API request (impure I/O)
    async fn send_once(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let response = self
            .authorize(self.client.post(self.endpoint("chat/completions")))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("server error: {status} - {body}")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(request.model.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("context") && body.contains("exceed") {
                warn!("Prompt exceeds the model context window");
            }
            return Err(LlmError::ApiError(format!("client error: {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_default() {
        let config = LocalProviderConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8080/v1");
        assert!(config.api_key.is_none());
        assert_eq!(config.compute_device, ComputeDevice::Cpu);
    }

    #[test]
    fn test_empty_base_url_is_rejected() {
        let config = LocalProviderConfig {
            base_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            LocalProvider::new(config),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_compute_device_parsing() {
        assert_eq!("CUDA".parse::<ComputeDevice>(), Ok(ComputeDevice::Cuda));
        assert_eq!(" cpu ".parse::<ComputeDevice>(), Ok(ComputeDevice::Cpu));
        assert!("tpu".parse::<ComputeDevice>().is_err());
        assert_eq!(ComputeDevice::Cuda.to_string(), "cuda");
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let provider = LocalProvider::new(LocalProviderConfig {
            base_url: "http://localhost:9000/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            provider.endpoint("chat/completions"),
            "http://localhost:9000/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let request = CompletionRequest::new("llama", vec![Message::user("Hello")]);
        let json = serde_json::to_string(&LocalProvider::convert_request(&request)).unwrap();
        assert!(json.contains("\"model\":\"llama\""));
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("stop"));
    }

    #[test]
    fn test_retry_classification() {
        assert!(LocalProvider::should_retry(&LlmError::NetworkError(
            "reset".to_string()
        )));
        assert!(LocalProvider::should_retry(&LlmError::ApiError(
            "server error: 503".to_string()
        )));
        assert!(!LocalProvider::should_retry(&LlmError::ApiError(
            "client error: 400".to_string()
        )));
        assert!(!LocalProvider::should_retry(&LlmError::ModelNotFound(
            "m".to_string()
        )));
    }

    #[test]
    fn test_finish_reason_conversion() {
        assert_eq!(
            LocalProvider::convert_finish_reason(Some("length")),
            FinishReason::Length
        );
        assert_eq!(
            LocalProvider::convert_finish_reason(None),
            FinishReason::Error
        );
    }
}
