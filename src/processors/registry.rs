//! Processor descriptors, provider bindings and the live registry
//!
//! Externally every processor is addressed by a colon-delimited provider id
//! `<namespace>:<model>:<task-type>`. Internally it is parsed once into a
//! [`ProcessorDescriptor`] and never handled as a string again.

use crate::catalog::ModelSpec;
use crate::error::WorkerError;
use crate::llm::{BackendFactory, LlmProvider};
use crate::observability::metrics;
use crate::processors::{ProcessorCache, TaskKind, TaskProcessor, TextProcessor};
use crate::transport::ProviderRegistration;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Prefix of the human readable provider name
const DISPLAY_NAME_PREFIX: &str = "Local Large language Model: ";

/// Advisory runtime hint sent with every registration, in seconds
pub const EXPECTED_RUNTIME_SECS: u64 = 30;

/// Constructed backends, keyed by model id
pub type BackendCache = ProcessorCache<Arc<dyn LlmProvider>>;

/// A (model, task kind) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorDescriptor {
    pub model: String,
    pub kind: TaskKind,
}

impl ProcessorDescriptor {
    pub fn new(model: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            model: model.into(),
            kind,
        }
    }

    /// External provider id under `namespace`
    pub fn provider_id(&self, namespace: &str) -> String {
        format!("{namespace}:{self}")
    }

    /// Parse `<namespace>:<model>:<task-type>`.
    ///
    /// The task type is everything after the first colon following the model.
    /// Returns `None` for foreign namespaces and unknown task types.
    pub fn parse(namespace: &str, provider_id: &str) -> Option<Self> {
        let rest = provider_id.strip_prefix(namespace)?.strip_prefix(':')?;
        let (model, task_type) = rest.split_once(':')?;
        if model.is_empty() {
            return None;
        }
        Some(Self::new(model, TaskKind::from_path(task_type)?))
    }
}

impl fmt::Display for ProcessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.kind.path())
    }
}

/// A descriptor as advertised to the task source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderBinding {
    pub descriptor: ProcessorDescriptor,
    pub provider_id: String,
    pub task_type_id: String,
    pub display_name: String,
}

impl ProviderBinding {
    pub fn new(namespace: &str, descriptor: ProcessorDescriptor) -> Self {
        Self {
            provider_id: descriptor.provider_id(namespace),
            task_type_id: descriptor.kind.path().to_string(),
            display_name: format!("{DISPLAY_NAME_PREFIX}{}", descriptor.model),
            descriptor,
        }
    }

    pub fn registration(&self) -> ProviderRegistration {
        ProviderRegistration {
            id: self.provider_id.clone(),
            name: self.display_name.clone(),
            task_type: self.task_type_id.clone(),
            expected_runtime: EXPECTED_RUNTIME_SECS,
        }
    }
}

/// Immutable snapshot of the models available at one scan
#[derive(Debug, Clone, Default)]
pub struct BindingSet {
    namespace: String,
    models: BTreeMap<String, Arc<ModelSpec>>,
}

impl BindingSet {
    pub fn new(namespace: impl Into<String>, models: Vec<Arc<ModelSpec>>) -> Self {
        Self {
            namespace: namespace.into(),
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model(&self, name: &str) -> Option<&Arc<ModelSpec>> {
        self.models.get(name)
    }

    /// One binding per model and task kind, ordered by model then kind
    pub fn bindings(&self) -> Vec<ProviderBinding> {
        self.models
            .keys()
            .flat_map(|model| {
                TaskKind::ALL.into_iter().map(move |kind| {
                    ProviderBinding::new(&self.namespace, ProcessorDescriptor::new(model, kind))
                })
            })
            .collect()
    }

    /// Provider ids and task-type ids to poll for, each sorted and deduplicated
    pub fn routing_sets(&self) -> (Vec<String>, Vec<String>) {
        let mut provider_ids = BTreeSet::new();
        let mut task_type_ids = BTreeSet::new();
        for binding in self.bindings() {
            provider_ids.insert(binding.provider_id);
            task_type_ids.insert(binding.task_type_id);
        }
        (
            provider_ids.into_iter().collect(),
            task_type_ids.into_iter().collect(),
        )
    }

    /// Resolve a provider id to a descriptor and its model, if still available
    pub fn resolve(&self, provider_id: &str) -> Option<(ProcessorDescriptor, Arc<ModelSpec>)> {
        let descriptor = ProcessorDescriptor::parse(&self.namespace, provider_id)?;
        let model = self.models.get(&descriptor.model)?.clone();
        Some((descriptor, model))
    }
}

/// Constructor for one descriptor's processor.
///
/// May be built repeatedly; the underlying backend is shared per model
/// through the cache.
#[derive(Clone)]
pub struct ProcessorFactory {
    descriptor: ProcessorDescriptor,
    model: Arc<ModelSpec>,
    backends: Arc<dyn BackendFactory>,
    cache: Arc<BackendCache>,
}

impl ProcessorFactory {
    pub fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    pub async fn build(&self) -> Result<Arc<dyn TaskProcessor>, WorkerError> {
        let backend = self
            .cache
            .get(&self.model.name, || async {
                let created = self.backends.create(&self.model).await;
                match &created {
                    Ok(_) => metrics().record_backend_constructed(),
                    Err(_) => metrics().record_construction_failure(),
                }
                created
            })
            .await
            .map_err(|e| WorkerError::construction(self.model.name.clone(), e))?;

        Ok(Arc::new(TextProcessor::new(
            self.descriptor.kind,
            self.model.clone(),
            backend,
        )))
    }
}

/// Live registry: the current binding set plus the shared backend cache
pub struct ProcessorRegistry {
    namespace: String,
    current: RwLock<Arc<BindingSet>>,
    backends: Arc<dyn BackendFactory>,
    cache: Arc<BackendCache>,
}

impl ProcessorRegistry {
    pub fn new(namespace: impl Into<String>, backends: Arc<dyn BackendFactory>) -> Self {
        let namespace = namespace.into();
        Self {
            current: RwLock::new(Arc::new(BindingSet::new(namespace.clone(), Vec::new()))),
            namespace,
            backends,
            cache: Arc::new(BackendCache::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current binding set
    pub fn snapshot(&self) -> Arc<BindingSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the binding set after a model scan, returning the new one
    pub fn refresh(&self, models: Vec<Arc<ModelSpec>>) -> Arc<BindingSet> {
        let next = Arc::new(BindingSet::new(self.namespace.clone(), models));
        let previous = std::mem::replace(
            &mut *self.current.write().unwrap_or_else(PoisonError::into_inner),
            next.clone(),
        );

        if previous.model_count() != next.model_count() {
            info!(
                before = previous.model_count(),
                after = next.model_count(),
                "Available models changed"
            );
        }
        next
    }

    /// Factory for the processor a provider id routes to
    pub fn factory_for(&self, provider_id: &str) -> Result<ProcessorFactory, WorkerError> {
        let Some((descriptor, model)) = self.snapshot().resolve(provider_id) else {
            warn!(provider_id, "Task routed to an unavailable processor");
            return Err(WorkerError::unavailable(provider_id));
        };

        Ok(ProcessorFactory {
            descriptor,
            model,
            backends: self.backends.clone(),
            cache: self.cache.clone(),
        })
    }

    /// Number of models with a constructed backend
    pub fn cached_backends(&self) -> usize {
        self.cache.len()
    }
}
