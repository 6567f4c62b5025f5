//! Per-model memoization of constructed backends
//!
//! Construction is single-flight: concurrent requests for the same
//! unconstructed model wait for one factory call instead of each building
//! their own backend. Failed constructions leave the slot empty so a later
//! request retries from scratch. Entries are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Lazily populated map from model id to a constructed value
pub struct ProcessorCache<T> {
    slots: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for ProcessorCache<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ProcessorCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, model_id: &str) -> Arc<OnceCell<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(model_id.to_string()).or_default().clone()
    }

    /// Return the value for `model_id`, invoking `factory` only if none has
    /// been constructed yet.
    pub async fn get<F, Fut, E>(&self, model_id: &str, factory: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot(model_id);
        if let Some(value) = slot.get() {
            return Ok(value.clone());
        }

        let value = slot
            .get_or_try_init(move || async move {
                debug!(model = model_id, "Constructing backend");
                factory().await
            })
            .await?;
        Ok(value.clone())
    }

    /// Value for `model_id` if it has already been constructed
    pub fn peek(&self, model_id: &str) -> Option<T> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(model_id).and_then(|slot| slot.get().cloned())
    }

    /// Number of constructed entries
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_factory_runs_once_per_model() {
        let cache: ProcessorCache<Arc<String>> = ProcessorCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get("m", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Arc::new("backend".to_string()))
            })
            .await
            .unwrap();
        let second = cache
            .get("m", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Arc::new("other".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache: ProcessorCache<u32> = ProcessorCache::new();

        let failed = cache.get("m", || async { Err::<u32, _>("load failed") }).await;
        assert_eq!(failed, Err("load failed"));
        assert!(cache.is_empty());
        assert_eq!(cache.peek("m"), None);

        let retried = cache.get("m", || async { Ok::<_, &str>(7) }).await;
        assert_eq!(retried, Ok(7));
        assert_eq!(cache.peek("m"), Some(7));
    }

    #[tokio::test]
    async fn test_models_are_cached_independently() {
        let cache: ProcessorCache<&'static str> = ProcessorCache::new();
        cache.get("a", || async { Ok::<_, ()>("A") }).await.unwrap();
        cache.get("b", || async { Ok::<_, ()>("B") }).await.unwrap();

        assert_eq!(cache.peek("a"), Some("A"));
        assert_eq!(cache.peek("b"), Some("B"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_construction() {
        let cache = Arc::new(ProcessorCache::<Arc<usize>>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..16).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get("shared", || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(Arc::new(n))
                    })
                    .await
            })
        });

        let results = futures::future::join_all(requests).await;
        let values: Vec<Arc<usize>> = results
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }
}
