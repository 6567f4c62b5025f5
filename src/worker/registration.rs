//! Registration synchronizer
//!
//! Keeps the task source's provider registry in line with the enabled flag
//! and the models currently on disk. Every binding is attempted on each pass;
//! one failing binding never prevents the others from being registered.

use crate::catalog::ModelCatalog;
use crate::observability::metrics;
use crate::processors::{BindingSet, ProcessorRegistry, ProviderBinding};
use crate::transport::{TaskSource, TransportError};
use crate::worker::context::WorkerContext;
use crate::worker::is_shutdown;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn, Instrument};

/// Binding that could not be (un)registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationFailure {
    pub provider_id: String,
    pub error: String,
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub enabled: bool,
    /// Bindings changed by this pass
    pub applied: usize,
    /// Bindings that were already in the requested state
    pub unchanged: usize,
    pub failures: Vec<RegistrationFailure>,
}

impl RegistrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: RegistrationReport) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.failures.extend(other.failures);
    }
}

pub struct Registrar {
    source: Arc<dyn TaskSource>,
    registry: Arc<ProcessorRegistry>,
    catalog: ModelCatalog,
    context: Arc<WorkerContext>,
    /// Held for a whole enable, disable or rescan pass
    pass: Mutex<()>,
}

impl Registrar {
    pub fn new(
        source: Arc<dyn TaskSource>,
        registry: Arc<ProcessorRegistry>,
        catalog: ModelCatalog,
        context: Arc<WorkerContext>,
    ) -> Self {
        Self {
            source,
            registry,
            catalog,
            context,
            pass: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Register (`enabled`) or unregister every binding
    pub async fn reconcile(&self, enabled: bool, bindings: &[ProviderBinding]) -> RegistrationReport {
        let span = crate::registration_span!(enabled, bindings = bindings.len());
        async move {
            let mut report = RegistrationReport {
                enabled,
                ..RegistrationReport::default()
            };

            for binding in bindings {
                let result = if enabled {
                    self.register_one(binding).await
                } else {
                    self.unregister_one(&binding.provider_id).await
                };
                record(&mut report, &binding.provider_id, result);
            }

            if report.is_complete() {
                info!(applied = report.applied, unchanged = report.unchanged, "Registry in sync");
            } else {
                warn!(
                    failed = report.failures.len(),
                    applied = report.applied,
                    "Some provider bindings could not be synchronized"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn register_one(&self, binding: &ProviderBinding) -> Result<bool, TransportError> {
        match self.source.register(&binding.registration()).await {
            Ok(()) => {
                metrics().record_registration(true);
                Ok(true)
            }
            Err(TransportError::Conflict(_)) => {
                debug!(provider_id = %binding.provider_id, "Provider already registered");
                Ok(false)
            }
            Err(e) => {
                metrics().record_registration(false);
                Err(e)
            }
        }
    }

    async fn unregister_one(&self, provider_id: &str) -> Result<bool, TransportError> {
        match self.source.unregister(provider_id).await {
            Ok(()) => {
                metrics().record_unregistration();
                Ok(true)
            }
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rescan the model directories and replace the binding set
    pub fn rescan(&self) -> Arc<BindingSet> {
        self.registry.refresh(self.catalog.scan())
    }

    /// Flip the enabled flag and bring the registry in line with it
    ///
    /// Passes never overlap; the last call to take the lock decides the
    /// final state. Disabling clears the flag before waiting for the lock so
    /// no new poll starts. Enabling registers first, then sets the flag,
    /// which ends a disabled wait in the dispatcher. The idle backoff is
    /// left alone.
    pub async fn set_enabled(&self, enabled: bool) -> RegistrationReport {
        if !enabled {
            self.context.set_enabled(false);
        }
        let _pass = self.pass.lock().await;
        metrics().set_enabled(enabled);
        if enabled {
            let bindings = self.rescan().bindings();
            let report = self.reconcile(true, &bindings).await;
            self.context.set_enabled(true);
            report
        } else {
            self.context.set_enabled(false);
            let bindings = self.registry.snapshot().bindings();
            self.reconcile(false, &bindings).await
        }
    }

    /// Rescan, register the current bindings and drop the ones that vanished
    pub async fn sync_after_rescan(&self) -> RegistrationReport {
        let _pass = self.pass.lock().await;
        let previous = self.registry.snapshot();
        let current = self.rescan();
        if !self.context.is_enabled() {
            return RegistrationReport::default();
        }

        let current_bindings = current.bindings();
        let current_ids: BTreeSet<&str> = current_bindings
            .iter()
            .map(|b| b.provider_id.as_str())
            .collect();
        let stale: Vec<ProviderBinding> = previous
            .bindings()
            .into_iter()
            .filter(|b| !current_ids.contains(b.provider_id.as_str()))
            .collect();

        let mut report = self.reconcile(true, &current_bindings).await;
        if !stale.is_empty() {
            info!(count = stale.len(), "Unregistering bindings of removed models");
            report.merge(self.reconcile(false, &stale).await);
        }
        report
    }

    /// Periodically rescan until `shutdown` turns true
    pub async fn run_rescan(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !is_shutdown(&shutdown) {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    let report = self.sync_after_rescan().await;
                    debug!(applied = report.applied, failed = report.failures.len(), "Periodic rescan done");
                }
            }
        }
    }
}

fn record(report: &mut RegistrationReport, provider_id: &str, result: Result<bool, TransportError>) {
    match result {
        Ok(true) => report.applied += 1,
        Ok(false) => report.unchanged += 1,
        Err(e) => {
            warn!(provider_id, error = %e, "Provider binding sync failed");
            report.failures.push(RegistrationFailure {
                provider_id: provider_id.to_string(),
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::TaskKind;
    use crate::testing::{MockBackendFactory, MockTaskSource};
    use std::fs;
    use tempfile::TempDir;

    fn setup(models: &[&str]) -> (TempDir, Arc<MockTaskSource>, Registrar, Arc<WorkerContext>) {
        let dir = TempDir::new().unwrap();
        for model in models {
            fs::write(dir.path().join(format!("{model}.gguf")), b"weights").unwrap();
        }
        let source = Arc::new(MockTaskSource::new());
        let registry = Arc::new(ProcessorRegistry::new("llm2", Arc::new(MockBackendFactory::new())));
        let context = Arc::new(WorkerContext::new(false));
        let registrar = Registrar::new(
            source.clone(),
            registry,
            ModelCatalog::new(dir.path()),
            context.clone(),
        );
        (dir, source, registrar, context)
    }

    #[tokio::test]
    async fn test_enable_registers_all_and_sets_flag() {
        let (_dir, source, registrar, context) = setup(&["a", "b"]);

        let report = registrar.set_enabled(true).await;

        assert!(report.is_complete());
        assert_eq!(report.applied, 2 * TaskKind::ALL.len());
        assert!(context.is_enabled());
        assert!(!context.trigger().seen());
        assert_eq!(source.registered_ids().await.len(), 2 * TaskKind::ALL.len());
    }

    #[tokio::test]
    async fn test_second_enable_is_idempotent() {
        let (_dir, source, registrar, _context) = setup(&["a"]);

        registrar.set_enabled(true).await;
        let first = source.registered_ids().await;
        let report = registrar.set_enabled(true).await;

        assert!(report.is_complete());
        assert_eq!(report.applied, 0);
        assert_eq!(report.unchanged, TaskKind::ALL.len());
        assert_eq!(source.registered_ids().await, first);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_bindings() {
        let (_dir, source, registrar, _context) = setup(&["a"]);
        let bindings = registrar.rescan().bindings();
        source.fail_provider(bindings[0].provider_id.clone()).await;

        let report = registrar.reconcile(true, &bindings).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].provider_id, bindings[0].provider_id);
        assert_eq!(report.applied, bindings.len() - 1);
        assert_eq!(source.register_calls().await.len(), bindings.len());
    }

    #[tokio::test]
    async fn test_disable_clears_flag_and_unregisters() {
        let (_dir, source, registrar, context) = setup(&["a"]);
        registrar.set_enabled(true).await;

        let report = registrar.set_enabled(false).await;

        assert!(!context.is_enabled());
        assert!(report.is_complete());
        assert_eq!(report.applied, TaskKind::ALL.len());
        assert!(source.registered_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_rescan_picks_up_added_and_removed_models() {
        let (dir, source, registrar, _context) = setup(&["a"]);
        registrar.set_enabled(true).await;

        fs::remove_file(dir.path().join("a.gguf")).unwrap();
        fs::write(dir.path().join("b.gguf"), b"weights").unwrap();
        let report = registrar.sync_after_rescan().await;

        assert!(report.is_complete());
        let registered = source.registered_ids().await;
        assert_eq!(registered.len(), TaskKind::ALL.len());
        assert!(registered.iter().all(|id| id.starts_with("llm2:b:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_during_rescan_leaves_nothing_registered() {
        let (_dir, source, registrar, _context) = setup(&["a", "b"]);
        registrar.set_enabled(true).await;
        source.set_register_delay(Duration::from_millis(100));
        let registrar = Arc::new(registrar);

        let rescan = {
            let registrar = registrar.clone();
            tokio::spawn(async move { registrar.sync_after_rescan().await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        let report = registrar.set_enabled(false).await;
        rescan.await.unwrap();

        assert!(!registrar.context.is_enabled());
        assert!(report.is_complete());
        assert!(source.registered_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_rescan_while_disabled_only_refreshes() {
        let (dir, source, registrar, _context) = setup(&[]);
        fs::write(dir.path().join("late.gguf"), b"weights").unwrap();

        let report = registrar.sync_after_rescan().await;

        assert_eq!(report, RegistrationReport::default());
        assert!(source.register_calls().await.is_empty());
        assert_eq!(registrar.registry.snapshot().model_count(), 1);
    }
}
