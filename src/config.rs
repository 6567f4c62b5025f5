//! Worker configuration
//!
//! Loaded from a TOML file, then adjusted by a small set of environment
//! overrides set by the hosting platform. Secrets are never stored in the
//! file; it only names the environment variables that hold them.

use crate::catalog::ModelCatalog;
use crate::llm::{ComputeDevice, LocalProviderConfig};
use crate::transport::AppApiConfig;
use crate::worker::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable selecting the compute device
pub const COMPUTE_DEVICE_ENV: &str = "COMPUTE_DEVICE";
/// Environment variable overriding the task source base URL
pub const BASE_URL_ENV: &str = "NEXTCLOUD_URL";
/// Environment variable overriding the writable model storage directory
pub const STORAGE_DIR_ENV: &str = "APP_PERSISTENT_STORAGE";

/// Shortest allowed re-check interval while disabled
pub const MIN_DISABLED_CHECK_SECS: u64 = 30;

/// Main worker configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub task_source: TaskSourceSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub control: ControlSection,
}

/// Identity of this worker towards the task source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    /// Application id (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Prefix of every provider id this worker registers
    #[serde(default = "default_namespace")]
    pub provider_namespace: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

fn default_namespace() -> String {
    "llm2".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSourceSection {
    pub base_url: String,
    /// Environment variable containing the shared app secret
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    #[serde(default = "default_task_source_timeout")]
    pub timeout_secs: u64,
}

fn default_secret_env() -> String {
    "APP_SECRET".to_string()
}

fn default_task_source_timeout() -> u64 {
    30
}

/// Local inference server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSection {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Environment variable containing an optional bearer key
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub compute_device: ComputeDevice,
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    LocalProviderConfig::default().base_url
}

fn default_backend_timeout() -> u64 {
    600
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key_env: None,
            compute_device: ComputeDevice::default(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelsSection {
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    pub storage_dir: Option<PathBuf>,
    /// JSON document with per-model fallback configuration
    pub default_config: Option<PathBuf>,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            storage_dir: None,
            default_config: None,
        }
    }
}

/// Dispatcher wait intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    #[serde(default = "default_idle")]
    pub idle_secs: u64,
    /// Idle wait once a wake trigger has been seen
    #[serde(default = "default_triggered_idle")]
    pub triggered_idle_secs: u64,
    #[serde(default = "default_error")]
    pub error_secs: u64,
    #[serde(default = "default_disabled_check")]
    pub disabled_check_secs: u64,
    /// Model directory rescan period
    #[serde(default = "default_rescan")]
    pub rescan_secs: u64,
}

fn default_idle() -> u64 {
    5
}

fn default_triggered_idle() -> u64 {
    300
}

fn default_error() -> u64 {
    10
}

fn default_disabled_check() -> u64 {
    MIN_DISABLED_CHECK_SECS
}

fn default_rescan() -> u64 {
    300
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            idle_secs: default_idle(),
            triggered_idle_secs: default_triggered_idle(),
            error_secs: default_error(),
            disabled_check_secs: default_disabled_check(),
            rescan_secs: default_rescan(),
        }
    }
}

impl DispatchSection {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            idle: Duration::from_secs(self.idle_secs),
            triggered_idle: Duration::from_secs(self.triggered_idle_secs),
            error: Duration::from_secs(self.error_secs),
            disabled: Duration::from_secs(self.disabled_check_secs),
        }
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_secs)
    }
}

/// Control endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlSection {
    #[serde(default = "default_control_host")]
    pub host: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

fn default_control_host() -> String {
    "0.0.0.0".to_string()
}

fn default_control_port() -> u16 {
    9090
}

impl ControlSection {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "control address '{}:{}' is invalid: {e}",
                    self.host, self.port
                ))
            })
    }
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            host: default_control_host(),
            port: default_control_port(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid worker ID format: {0}")]
    InvalidWorkerId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkerConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content, |name| std::env::var(name).ok())
    }

    /// Parse configuration text, resolving overrides through `lookup`
    pub fn from_toml_str(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: WorkerConfig = toml::from_str(content)?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the platform's environment overrides
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(device) = lookup(COMPUTE_DEVICE_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend.compute_device = device
                .parse()
                .map_err(ConfigError::InvalidConfig)?;
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.task_source.base_url = url;
        }
        if let Some(dir) = lookup(STORAGE_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.models.storage_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_worker_id(&self.worker.id)?;
        validate_worker_id(&self.worker.provider_namespace)?;
        validate_url("task_source.base_url", &self.task_source.base_url)?;
        validate_url("backend.base_url", &self.backend.base_url)?;
        self.control.socket_addr()?;

        let dispatch = &self.dispatch;
        for (name, value) in [
            ("idle_secs", dispatch.idle_secs),
            ("triggered_idle_secs", dispatch.triggered_idle_secs),
            ("error_secs", dispatch.error_secs),
            ("disabled_check_secs", dispatch.disabled_check_secs),
            ("rescan_secs", dispatch.rescan_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "dispatch.{name} must be greater than zero"
                )));
            }
        }
        if dispatch.disabled_check_secs < MIN_DISABLED_CHECK_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "dispatch.disabled_check_secs must be at least {MIN_DISABLED_CHECK_SECS}"
            )));
        }
        if dispatch.triggered_idle_secs < dispatch.idle_secs {
            return Err(ConfigError::InvalidConfig(
                "dispatch.triggered_idle_secs must not be shorter than dispatch.idle_secs"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get the shared app secret from its environment variable
    pub fn get_task_source_secret(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.task_source.secret_env)
    }

    /// Get the optional backend bearer key
    pub fn get_backend_api_key(&self) -> Option<String> {
        self.backend
            .api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    pub fn app_api_config(&self) -> Result<AppApiConfig, ConfigError> {
        Ok(AppApiConfig {
            base_url: self.task_source.base_url.clone(),
            app_id: self.worker.id.clone(),
            app_version: self.worker.app_version.clone(),
            secret: self.get_task_source_secret()?,
            timeout: Duration::from_secs(self.task_source.timeout_secs),
        })
    }

    pub fn local_provider_config(&self) -> LocalProviderConfig {
        LocalProviderConfig {
            base_url: self.backend.base_url.clone(),
            api_key: self.get_backend_api_key(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
            compute_device: self.backend.compute_device,
        }
    }

    pub fn catalog(&self) -> ModelCatalog {
        let mut catalog = ModelCatalog::new(&self.models.models_dir);
        if let Some(dir) = &self.models.storage_dir {
            catalog = catalog.with_storage_dir(dir);
        }
        if let Some(path) = &self.models.default_config {
            catalog = catalog.with_default_config(path);
        }
        catalog
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[worker]
id = "llm2"

[task_source]
base_url = "http://localhost:8080"
"#;
        Self::from_toml_str(toml_content, |_| None).expect("Test config should parse")
    }
}

/// Validate an identifier against [a-zA-Z0-9._-]+
fn validate_worker_id(worker_id: &str) -> Result<(), ConfigError> {
    let valid_chars = worker_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if worker_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidWorkerId(format!(
            "'{worker_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidConfig(format!("{field} '{value}' is not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidConfig(format!(
            "{field} has unsupported scheme '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"
[worker]
id = "llm2"
provider_namespace = "llm2"
app_version = "2.1.0"

[task_source]
base_url = "https://cloud.example.com"
secret_env = "LLM2_SECRET"
timeout_secs = 15

[backend]
base_url = "http://127.0.0.1:9000/v1"
api_key_env = "LLAMA_KEY"
compute_device = "cuda"

[models]
models_dir = "/srv/models"
storage_dir = "/var/lib/llm2"
default_config = "/srv/models/default_config.json"

[dispatch]
idle_secs = 2
triggered_idle_secs = 120
error_secs = 7
disabled_check_secs = 45
rescan_secs = 60

[control]
port = 23000
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_full_config() {
        let config = WorkerConfig::from_toml_str(FULL, no_env).unwrap();
        assert_eq!(config.worker.app_version, "2.1.0");
        assert_eq!(config.task_source.secret_env, "LLM2_SECRET");
        assert_eq!(config.backend.compute_device, ComputeDevice::Cuda);
        assert_eq!(config.models.storage_dir, Some(PathBuf::from("/var/lib/llm2")));
        assert_eq!(config.control.port, 23000);
        assert_eq!(config.control.host, "0.0.0.0");

        let policy = config.dispatch.backoff_policy();
        assert_eq!(policy.idle, Duration::from_secs(2));
        assert_eq!(policy.triggered_idle, Duration::from_secs(120));
        assert_eq!(policy.disabled, Duration::from_secs(45));
        assert_eq!(config.dispatch.rescan_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = WorkerConfig::test_config();
        assert_eq!(config.worker.provider_namespace, "llm2");
        assert_eq!(config.task_source.secret_env, "APP_SECRET");
        assert_eq!(config.backend.compute_device, ComputeDevice::Cpu);
        assert_eq!(config.models.models_dir, PathBuf::from("models"));
        assert_eq!(config.dispatch, DispatchSection::default());
        assert_eq!(config.dispatch.idle_secs, 5);
        assert_eq!(config.dispatch.triggered_idle_secs, 300);
        assert_eq!(config.dispatch.rescan_secs, 300);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            (COMPUTE_DEVICE_ENV, "CUDA"),
            (BASE_URL_ENV, "https://other.example.com"),
            (STORAGE_DIR_ENV, "/data"),
        ]
        .into_iter()
        .collect();

        let config = WorkerConfig::from_toml_str(FULL.replace("cuda", "cpu").as_str(), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.backend.compute_device, ComputeDevice::Cuda);
        assert_eq!(config.task_source.base_url, "https://other.example.com");
        assert_eq!(config.models.storage_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_unknown_compute_device_is_rejected() {
        let result = WorkerConfig::from_toml_str(FULL, |name| {
            (name == COMPUTE_DEVICE_ENV).then(|| "tpu".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_worker_id() {
        assert!(validate_worker_id("invalid@worker").is_err());
        assert!(validate_worker_id("").is_err());
        assert!(validate_worker_id("valid-worker_123.test").is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let toml_content = FULL.replace("https://cloud.example.com", "not a url");
        let result = WorkerConfig::from_toml_str(&toml_content, no_env);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_interval_rules() {
        let zero = FULL.replace("error_secs = 7", "error_secs = 0");
        assert!(WorkerConfig::from_toml_str(&zero, no_env).is_err());

        let short_disabled = FULL.replace("disabled_check_secs = 45", "disabled_check_secs = 10");
        assert!(WorkerConfig::from_toml_str(&short_disabled, no_env).is_err());

        let inverted = FULL.replace("triggered_idle_secs = 120", "triggered_idle_secs = 1");
        assert!(WorkerConfig::from_toml_str(&inverted, no_env).is_err());
    }

    #[test]
    fn test_control_address() {
        let config = WorkerConfig::from_toml_str(FULL, no_env).unwrap();
        assert_eq!(config.control.socket_addr().unwrap().port(), 23000);

        let bad_host = FULL.replace("port = 23000", "host = \"not a host\"\nport = 23000");
        assert!(WorkerConfig::from_toml_str(&bad_host, no_env).is_err());
    }

    #[test]
    fn test_missing_secret_env() {
        let mut config = WorkerConfig::test_config();
        config.task_source.secret_env = "OFFLOAD_WORKER_TEST_UNSET_SECRET".to_string();
        assert!(matches!(
            config.app_api_config(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "OFFLOAD_WORKER_TEST_UNSET_SECRET"
        ));
    }

    #[test]
    fn test_local_provider_config_carries_device() {
        let config = WorkerConfig::from_toml_str(FULL, no_env).unwrap();
        let provider = config.local_provider_config();
        assert_eq!(provider.base_url, "http://127.0.0.1:9000/v1");
        assert_eq!(provider.compute_device, ComputeDevice::Cuda);
        assert_eq!(provider.timeout, Duration::from_secs(600));
    }
}
