//! HTTP task source for the AppAPI / OCS interface of the hosting platform

use crate::transport::{
    PolledTask, ProviderRegistration, TaskOutcome, TaskSource, TransportError,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

const NEXT_TASK_PATH: &str = "/ocs/v2.php/taskprocessing/tasks_provider/next";
const PROVIDER_PATH: &str = "/ocs/v1.php/apps/app_api/api/v1/ai_provider/task_processing";
const STATE_PATH: &str = "/ocs/v1.php/apps/app_api/ex-app/state";

/// Connection settings for the hosting platform
#[derive(Debug, Clone)]
pub struct AppApiConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_version: String,
    pub secret: String,
    pub timeout: Duration,
}

/// Task source backed by the platform's OCS endpoints
pub struct AppApiTaskSource {
    base_url: String,
    client: Client,
}

/// OCS response envelope
#[derive(Debug, Deserialize)]
struct OcsEnvelope {
    ocs: OcsBody,
}

#[derive(Debug, Deserialize)]
struct OcsBody {
    #[serde(default)]
    data: Value,
}

impl AppApiTaskSource {
    pub fn new(config: AppApiConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(auth_headers(&config)?)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Extract `ocs.data` from a successful response
    async fn ocs_data(response: Response) -> Result<Value, TransportError> {
        let envelope: OcsEnvelope = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(envelope.ocs.data)
    }
}

/// Authentication headers expected by the platform on every request
pub fn auth_headers(config: &AppApiConfig) -> Result<HeaderMap, TransportError> {
    let token = STANDARD.encode(format!(":{}", config.secret));
    let pairs = [
        ("ex-app-id", config.app_id.as_str()),
        ("ex-app-version", config.app_version.as_str()),
        ("ocs-apirequest", "true"),
        ("authorization-app-api", token.as_str()),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Malformed(format!("invalid {name} header: {e}")))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn network_error(e: reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

/// Map non-success statuses onto transport errors
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::CONFLICT => TransportError::Conflict(body),
        StatusCode::NOT_FOUND => TransportError::NotFound(body),
        _ => TransportError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

/// Whether an OCS data payload carries no task
fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl TaskSource for AppApiTaskSource {
    async fn fetch_next_task(
        &self,
        provider_ids: &[String],
        task_type_ids: &[String],
    ) -> Result<Option<PolledTask>, TransportError> {
        let mut query: Vec<(&str, &str)> = vec![("format", "json")];
        query.extend(provider_ids.iter().map(|id| ("providerIds[]", id.as_str())));
        query.extend(task_type_ids.iter().map(|id| ("taskTypeIds[]", id.as_str())));

        let response = self
            .client
            .get(self.url(NEXT_TASK_PATH))
            .query(&query)
            .send()
            .await
            .map_err(network_error)?;

        if response.status() == StatusCode::NO_CONTENT {
            trace!("No task available");
            return Ok(None);
        }

        let data = Self::ocs_data(check_status(response).await?).await?;
        if is_empty_payload(&data) {
            return Ok(None);
        }

        let polled: PolledTask =
            serde_json::from_value(data).map_err(|e| TransportError::Malformed(e.to_string()))?;
        debug!(task_id = polled.task.id, provider = %polled.provider.name, "Fetched task");
        Ok(Some(polled))
    }

    async fn report_result(
        &self,
        task_id: i64,
        outcome: &TaskOutcome,
    ) -> Result<(), TransportError> {
        let body = match outcome {
            TaskOutcome::Success(output) => json!({"taskId": task_id, "output": output}),
            TaskOutcome::Failure(message) => json!({"taskId": task_id, "errorMessage": message}),
        };

        let path = format!("/ocs/v2.php/taskprocessing/tasks_provider/{task_id}/result");
        let response = self
            .client
            .post(self.url(&path))
            .query(&[("format", "json")])
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn register(&self, registration: &ProviderRegistration) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(PROVIDER_PATH))
            .query(&[("format", "json")])
            .json(&json!({ "provider": registration }))
            .send()
            .await
            .map_err(network_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn unregister(&self, provider_id: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(self.url(PROVIDER_PATH))
            .query(&[("format", "json")])
            .json(&json!({ "name": provider_id }))
            .send()
            .await
            .map_err(network_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn fetch_enabled_state(&self) -> Result<bool, TransportError> {
        let response = self
            .client
            .get(self.url(STATE_PATH))
            .query(&[("format", "json")])
            .send()
            .await
            .map_err(network_error)?;

        let data = Self::ocs_data(check_status(response).await?).await?;
        match data {
            Value::Bool(enabled) => Ok(enabled),
            Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
            other => Err(TransportError::Malformed(format!(
                "unexpected enabled state payload: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppApiConfig {
        AppApiConfig {
            base_url: "http://nextcloud.local/".to_string(),
            app_id: "llm2".to_string(),
            app_version: "1.0.0".to_string(),
            secret: "s3cr3t".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_auth_header_encodes_secret() {
        let headers = auth_headers(&config()).unwrap();
        let expected = STANDARD.encode(":s3cr3t");
        assert_eq!(headers["authorization-app-api"], expected.as_str());
        assert_eq!(headers["ex-app-id"], "llm2");
        assert_eq!(headers["ocs-apirequest"], "true");
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let mut config = config();
        config.app_id = "bad\nid".to_string();
        assert!(matches!(
            auth_headers(&config),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let source = AppApiTaskSource::new(config()).unwrap();
        assert_eq!(
            source.url(STATE_PATH),
            "http://nextcloud.local/ocs/v1.php/apps/app_api/ex-app/state"
        );
    }

    #[test]
    fn test_empty_payload_detection() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!({"task": {}})));
    }
}
