//! Worker core: dispatcher loop, registration synchronizer and the service
//! that wires them to the control endpoint

pub mod backoff;
pub mod context;
pub mod dispatcher;
pub mod registration;
pub mod service;

pub use backoff::{BackoffPolicy, WaitReason};
pub use context::{WaitOutcome, WakeTrigger, WorkerContext};
pub use dispatcher::{Dispatcher, PollOutcome};
pub use registration::{Registrar, RegistrationFailure, RegistrationReport};
pub use service::WorkerService;

use tokio::sync::watch;

/// Whether shutdown has been requested
pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolve once shutdown is requested or the sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !is_shutdown(shutdown) {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
