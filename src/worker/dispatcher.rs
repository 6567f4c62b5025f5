//! Dispatcher main loop
//!
//! One dispatcher holds at most one task in flight. Each iteration checks the
//! enabled flag, polls the task source once, processes what it got and
//! reports the outcome before the next poll starts:
//!
//! ```text
//! WAITING_ENABLED -> POLLING -> (IDLE_BACKOFF | PROCESSING) -> POLLING ...
//! ```
//!
//! Shutdown is only observed between iterations; a task that has started
//! processing always runs to completion and is reported.

use crate::error::{WorkerError, WorkerResult};
use crate::observability::metrics;
use crate::processors::ProcessorRegistry;
use crate::transport::{PolledTask, TaskData, TaskOutcome, TaskSource};
use crate::worker::backoff::{BackoffPolicy, WaitReason};
use crate::worker::context::WorkerContext;
use crate::worker::is_shutdown;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Result of one dispatcher iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Enabled flag was clear; nothing was fetched
    Disabled,
    NoTask,
    /// Task processed and reported as a success
    Completed { task_id: i64 },
    /// Task processed and reported as a failure
    Failed { task_id: i64 },
    /// Fetch failed at the transport level
    TransportError,
}

impl PollOutcome {
    /// Wait to apply before the next iteration, `None` to poll again at once
    fn wait_reason(&self) -> Option<WaitReason> {
        match self {
            PollOutcome::Disabled => Some(WaitReason::Disabled),
            PollOutcome::NoTask => Some(WaitReason::Idle),
            PollOutcome::TransportError => Some(WaitReason::Error),
            PollOutcome::Completed { .. } | PollOutcome::Failed { .. } => None,
        }
    }
}

pub struct Dispatcher {
    source: Arc<dyn TaskSource>,
    registry: Arc<ProcessorRegistry>,
    context: Arc<WorkerContext>,
    policy: BackoffPolicy,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn TaskSource>,
        registry: Arc<ProcessorRegistry>,
        context: Arc<WorkerContext>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            source,
            registry,
            context,
            policy,
        }
    }

    /// Run one iteration: check the flag, poll once, process and report
    pub async fn poll_once(&self) -> PollOutcome {
        if !self.context.is_enabled() {
            return PollOutcome::Disabled;
        }

        let bindings = self.registry.snapshot();
        let (provider_ids, task_type_ids) = bindings.routing_sets();
        metrics().record_poll();

        match self
            .source
            .fetch_next_task(&provider_ids, &task_type_ids)
            .await
        {
            Ok(None) => PollOutcome::NoTask,
            Ok(Some(polled)) => self.handle(polled).await,
            Err(e) => {
                metrics().record_poll_error();
                warn!(error = %e, transient = e.is_transient(), "Polling for tasks failed");
                PollOutcome::TransportError
            }
        }
    }

    async fn handle(&self, polled: PolledTask) -> PollOutcome {
        let span = crate::task_span!(
            task_id = polled.task.id,
            provider = %polled.provider.name
        );
        self.handle_inner(polled).instrument(span).await
    }

    async fn handle_inner(&self, polled: PolledTask) -> PollOutcome {
        let task_id = polled.task.id;
        let started = Instant::now();
        metrics().task_received();
        info!("Processing task");

        let outcome = match self.execute(&polled).await {
            Ok(output) => {
                metrics().task_completed(started.elapsed());
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Task completed");
                TaskOutcome::Success(output)
            }
            Err(e) => {
                if matches!(e, WorkerError::ProcessorUnavailable { .. }) {
                    metrics().task_unavailable();
                }
                metrics().task_failed(started.elapsed());
                warn!(error = %e, "Task failed");
                TaskOutcome::Failure(e.report_message())
            }
        };

        if let Err(e) = self.source.report_result(task_id, &outcome).await {
            // The report is not retried; the loop moves on to the next poll
            metrics().record_report_failure();
            warn!(error = %e, "Failed to report task result");
        }

        match outcome {
            TaskOutcome::Success(_) => PollOutcome::Completed { task_id },
            TaskOutcome::Failure(_) => PollOutcome::Failed { task_id },
        }
    }

    async fn execute(&self, polled: &PolledTask) -> WorkerResult<TaskData> {
        let factory = self.registry.factory_for(&polled.provider.name)?;
        let processor = factory.build().await?;
        debug!(kind = %processor.kind(), "Invoking processor");
        Ok(processor.process(&polled.task.input).await?)
    }

    /// Wait after an iteration, ending early on the relevant signal
    async fn pause(&self, reason: WaitReason) {
        let interval = self
            .policy
            .interval(reason, self.context.trigger().seen());
        match reason {
            WaitReason::Disabled => {
                self.context.wait_for_enabled(interval).await;
            }
            WaitReason::Idle => {
                self.context.trigger().wait(interval).await;
            }
            WaitReason::Error => tokio::time::sleep(interval).await,
        }
    }

    /// Loop until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Dispatcher started");

        while !is_shutdown(&shutdown) {
            let outcome = self.poll_once().await;
            let Some(reason) = outcome.wait_reason() else {
                continue;
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.pause(reason) => {}
            }
        }

        info!("Dispatcher stopped");
    }
}
