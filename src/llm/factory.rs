//! Backend construction for discovered models

use crate::catalog::ModelSpec;
use crate::llm::provider::{LlmError, LlmProvider};
use crate::llm::providers::local::{LocalProvider, LocalProviderConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds one inference backend per model
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(&self, model: &ModelSpec) -> Result<Arc<dyn LlmProvider>, LlmError>;
}

/// Factory for backends served by a local OpenAI-compatible inference server
pub struct LocalBackendFactory {
    config: LocalProviderConfig,
}

impl LocalBackendFactory {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendFactory for LocalBackendFactory {
    async fn create(&self, model: &ModelSpec) -> Result<Arc<dyn LlmProvider>, LlmError> {
        if !model.path.is_file() {
            return Err(LlmError::ModelNotFound(format!(
                "model file {} does not exist",
                model.path.display()
            )));
        }

        info!(
            model = %model.name,
            path = %model.path.display(),
            device = %self.config.compute_device,
            n_ctx = model.config.loader_config.n_ctx,
            "Loading inference backend"
        );

        let provider = LocalProvider::new(self.config.clone())?;
        if let Err(e) = provider.health_check().await {
            warn!(
                model = %model.name,
                device = %self.config.compute_device,
                error = %e,
                "Inference backend failed its health check"
            );
            return Err(e);
        }

        Ok(Arc::new(provider))
    }
}
