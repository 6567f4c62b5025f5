//! Control HTTP endpoint
//!
//! The hosting platform flips the worker on and off, and nudges the
//! dispatcher when new work is queued. Operators can read status and
//! metrics from the same server.
//!
//! - `GET  /heartbeat`
//! - `PUT  /enabled?enabled=0|1`
//! - `POST /trigger`
//! - `POST /backoff/reset`
//! - `GET  /status`
//! - `GET  /metrics`

use crate::observability::metrics;
use crate::worker::{Registrar, WorkerContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Handles shared by the control routes
#[derive(Clone)]
pub struct ControlState {
    pub context: Arc<WorkerContext>,
    pub registrar: Arc<Registrar>,
}

#[derive(Debug, Deserialize)]
struct EnabledQuery {
    enabled: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub enabled: bool,
    /// Idle waits are currently escalated
    pub trigger_seen: bool,
    pub models: usize,
    pub bindings: usize,
    pub cached_backends: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: DateTime<Utc>,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn with_state(
    state: ControlState,
) -> impl Filter<Extract = (ControlState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// All control routes
pub fn routes(
    state: ControlState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // GET /heartbeat - liveness for the hosting platform
    let heartbeat = warp::path("heartbeat")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&HeartbeatResponse { status: "ok" }));

    // PUT /enabled?enabled=0|1 - enable or disable and sync the registry
    let enabled = warp::path("enabled")
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::query::<EnabledQuery>())
        .and(with_state(state.clone()))
        .and_then(|query: EnabledQuery, state: ControlState| async move {
            let Some(flag) = parse_flag(&query.enabled) else {
                let error = ErrorResponse {
                    error: format!("Invalid enabled value '{}'", query.enabled),
                    timestamp: Utc::now(),
                };
                return Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&error),
                    StatusCode::BAD_REQUEST,
                ));
            };

            info!(enabled = flag, "Enabled state changed");
            let report = state.registrar.set_enabled(flag).await;
            Ok(warp::reply::with_status(
                warp::reply::json(&report),
                StatusCode::OK,
            ))
        });

    // POST /trigger - new work queued, cut the current idle wait short
    let trigger = warp::path("trigger")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .map(|state: ControlState| {
            state.context.fire_trigger();
            StatusCode::NO_CONTENT
        });

    // POST /backoff/reset - return idle waits to the short interval
    let reset = warp::path!("backoff" / "reset")
        .and(warp::post())
        .and(with_state(state.clone()))
        .map(|state: ControlState| {
            state.context.reset_backoff();
            StatusCode::NO_CONTENT
        });

    let status = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .map(|state: ControlState| {
            let registry = state.registrar.registry();
            let bindings = registry.snapshot();
            warp::reply::json(&StatusResponse {
                enabled: state.context.is_enabled(),
                trigger_seen: state.context.trigger().seen(),
                models: bindings.model_count(),
                bindings: bindings.bindings().len(),
                cached_backends: registry.cached_backends(),
                timestamp: Utc::now(),
            })
        });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    heartbeat
        .or(enabled)
        .or(trigger)
        .or(reset)
        .or(status)
        .or(metrics_route)
}

/// Serve the control routes until `shutdown` turns true
pub async fn serve(
    state: ControlState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), warp::Error> {
    let (bound, server) =
        warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, async move {
            crate::worker::wait_for_shutdown(&mut shutdown).await;
        })?;

    info!(addr = %bound, "Control server listening");
    server.await;
    Ok(())
}
