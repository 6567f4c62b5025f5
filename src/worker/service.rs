//! Service wiring
//!
//! Builds the shared context, the processor registry, the dispatcher and the
//! registration synchronizer from configuration, then runs the dispatcher,
//! the periodic rescan and the control server side by side.

use crate::config::WorkerConfig;
use crate::control::{self, ControlState};
use crate::error::WorkerResult;
use crate::llm::{BackendFactory, LocalBackendFactory};
use crate::processors::ProcessorRegistry;
use crate::transport::{AppApiTaskSource, TaskSource, TransportError};
use crate::worker::{Dispatcher, Registrar, WorkerContext};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

pub struct WorkerService {
    config: WorkerConfig,
    source: Arc<dyn TaskSource>,
    context: Arc<WorkerContext>,
    registrar: Arc<Registrar>,
    dispatcher: Arc<Dispatcher>,
}

impl WorkerService {
    /// Build the service against the real task source and inference server
    pub fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        let source = AppApiTaskSource::new(config.app_api_config()?)?;
        let backends = LocalBackendFactory::new(config.local_provider_config());
        Ok(Self::with_components(
            config,
            Arc::new(source),
            Arc::new(backends),
        ))
    }

    /// Build the service around injected collaborators
    pub fn with_components(
        config: WorkerConfig,
        source: Arc<dyn TaskSource>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        let context = Arc::new(WorkerContext::new(false));
        let registry = Arc::new(ProcessorRegistry::new(
            config.worker.provider_namespace.clone(),
            backends,
        ));
        let registrar = Arc::new(Registrar::new(
            source.clone(),
            registry.clone(),
            config.catalog(),
            context.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            source.clone(),
            registry,
            context.clone(),
            config.dispatch.backoff_policy(),
        ));

        Self {
            config,
            source,
            context,
            registrar,
            dispatcher,
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    pub fn registrar(&self) -> &Arc<Registrar> {
        &self.registrar
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn control_state(&self) -> ControlState {
        ControlState {
            context: self.context.clone(),
            registrar: self.registrar.clone(),
        }
    }

    /// Scan models and restore the enabled state the platform has on record
    pub async fn start(&self) -> Result<bool, TransportError> {
        let span = crate::lifecycle_span!(phase = "startup", worker_id = %self.config.worker.id);
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&self) -> Result<bool, TransportError> {
        let bindings = self.registrar.rescan();
        info!(
            models = bindings.model_count(),
            namespace = bindings.namespace(),
            "Discovered models"
        );

        let enabled = self.source.fetch_enabled_state().await?;
        if enabled {
            let report = self.registrar.set_enabled(true).await;
            info!(
                applied = report.applied,
                failed = report.failures.len(),
                "Worker enabled at startup"
            );
        } else {
            info!("Worker is disabled, waiting for the enable call");
        }
        Ok(enabled)
    }

    /// Run until `shutdown` turns true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let addr = self.config.control.socket_addr()?;

        if let Err(e) = self.start().await {
            warn!(error = %e, "Could not read the enabled state, starting disabled");
        }

        let dispatcher = self.dispatcher.clone();
        let dispatcher_shutdown = shutdown.clone();
        let dispatcher_handle =
            tokio::spawn(async move { dispatcher.run(dispatcher_shutdown).await });

        let registrar = self.registrar.clone();
        let rescan_interval = self.config.dispatch.rescan_interval();
        let rescan_shutdown = shutdown.clone();
        let rescan_handle = tokio::spawn(async move {
            registrar.run_rescan(rescan_interval, rescan_shutdown).await
        });

        let control_result = control::serve(self.control_state(), addr, shutdown).await;
        if let Err(e) = &control_result {
            error!(error = %e, %addr, "Control server failed");
        }

        for (name, handle) in [("dispatcher", dispatcher_handle), ("rescan", rescan_handle)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        info!("Worker service stopped");
        Ok(control_result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::TaskKind;
    use crate::testing::{MockBackendFactory, MockTaskSource};
    use std::fs;
    use tempfile::TempDir;

    fn service(dir: &TempDir, source: Arc<MockTaskSource>) -> WorkerService {
        let mut config = WorkerConfig::test_config();
        config.models.models_dir = dir.path().to_path_buf();
        WorkerService::with_components(config, source, Arc::new(MockBackendFactory::new()))
    }

    #[tokio::test]
    async fn test_start_enabled_registers_bindings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("m.gguf"), b"weights").unwrap();
        let source = Arc::new(MockTaskSource::new());
        let service = service(&dir, source.clone());

        assert!(service.start().await.unwrap());
        assert!(service.context().is_enabled());
        assert_eq!(source.registered_ids().await.len(), TaskKind::ALL.len());
    }

    #[tokio::test]
    async fn test_start_disabled_registers_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("m.gguf"), b"weights").unwrap();
        let source = Arc::new(MockTaskSource::disabled());
        let service = service(&dir, source.clone());

        assert!(!service.start().await.unwrap());
        assert!(!service.context().is_enabled());
        assert!(source.register_calls().await.is_empty());
        assert_eq!(service.registrar().registry().snapshot().model_count(), 1);
    }

    #[tokio::test]
    async fn test_start_state_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockTaskSource::new());
        source.set_fail_state(true);
        let service = service(&dir, source);

        assert!(service.start().await.is_err());
        assert!(!service.context().is_enabled());
    }
}
