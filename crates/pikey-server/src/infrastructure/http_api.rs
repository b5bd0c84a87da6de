//! Request/response HTTP surface.
//!
//! | Route         | Method     | Input                          | Success          |
//! |---------------|------------|--------------------------------|------------------|
//! | `/press`      | GET, POST  | query `key`, `duration` (ms)   | `queued`         |
//! | `/press-sync` | GET, POST  | query `key`, `duration` (ms)   | `ok`             |
//! | `/actions`    | POST       | `[{"key":..,"duration":..}]`   | `queued`         |
//! | `/type`       | POST       | `{"text":..}`                  | `queued`         |
//! | `/stats`      | GET        |                                | JSON snapshot    |
//! | `/health`     | GET        |                                | JSON status      |
//!
//! Errors are plain text with the status from
//! [`DispatchError::status_code`].  `/press`, `/actions` and `/type` return
//! as soon as the work is admitted; `/press-sync` waits for the outcome up
//! to the sync timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use pikey_core::{PressCommand, TextCommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::application::dispatch::{DispatchError, Dispatcher, Job};
use crate::application::telemetry::{LatencyRecord, StatsSnapshot};

use super::channel::{ChannelManager, ChannelStats};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub channel: Arc<ChannelManager>,
}

/// A dispatch error rendered as a plain-text HTTP response.
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PressQuery {
    key: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionItem {
    key: String,
    #[serde(default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TypeRequest {
    text: String,
}

/// Hold time from a `duration` query value.  Anything that is not a
/// positive integer falls back to the default hold.
fn parse_hold_ms(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
}

fn press_command(
    dispatcher: &Dispatcher,
    query: PressQuery,
    peer: SocketAddr,
) -> Result<PressCommand, DispatchError> {
    let key = query.key.unwrap_or_default();
    if key.trim().is_empty() {
        return Err(dispatcher.reject_invalid("key parameter is required"));
    }
    Ok(PressCommand::with_hold_ms(
        key,
        parse_hold_ms(query.duration.as_deref()),
        peer.to_string(),
    ))
}

async fn press(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<PressQuery>,
) -> Result<&'static str, ApiError> {
    let cmd = press_command(&state.dispatcher, query, peer)?;
    debug!("press {} for {:?} from {peer}", cmd.key(), cmd.hold());
    state.dispatcher.submit(Job::Press(cmd)).await?;
    Ok("queued")
}

async fn press_sync(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<PressQuery>,
) -> Result<&'static str, ApiError> {
    let cmd = press_command(&state.dispatcher, query, peer)?;
    state.dispatcher.run(Job::Press(cmd)).await?;
    Ok("ok")
}

async fn actions(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let items: Vec<ActionItem> = serde_json::from_slice(&body)
        .map_err(|e| state.dispatcher.reject_invalid(format!("invalid JSON body: {e}")))?;
    let origin = peer.to_string();
    let presses: Vec<PressCommand> = items
        .into_iter()
        .map(|item| {
            PressCommand::with_hold_ms(item.key, item.duration.filter(|ms| *ms > 0), origin.as_str())
        })
        .collect();
    let count = presses.len();
    state.dispatcher.submit(Job::Batch(presses)).await?;
    info!("queued batch of {count} action(s) from {peer}");
    Ok("queued")
}

async fn type_text(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let request: TypeRequest = serde_json::from_slice(&body)
        .map_err(|e| state.dispatcher.reject_invalid(format!("invalid JSON body: {e}")))?;
    let ticket = state
        .dispatcher
        .submit(Job::Type(TextCommand::new(request.text, peer.to_string())))
        .await?;
    info!("queued text of {} key(s) from {peer}", ticket.actions());
    Ok("queued")
}

// ── Stats ─────────────────────────────────────────────────────────────────────

fn ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Serialize)]
pub struct LatencyBreakdown {
    pub queue_ms: f64,
    pub process_ms: f64,
    pub network_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub total_latency_ms: f64,
    pub queue_latency_ms: f64,
    pub process_latency_ms: f64,
    pub network_latency_ms: f64,
    pub success: bool,
}

impl From<&LatencyRecord> for HistoryEntry {
    fn from(r: &LatencyRecord) -> Self {
        Self {
            timestamp: r.timestamp,
            total_latency_ms: ms(r.phases.total),
            queue_latency_ms: ms(r.phases.queue),
            process_latency_ms: ms(r.phases.process),
            network_latency_ms: ms(r.phases.network),
            success: r.success,
        }
    }
}

/// Body of `GET /stats`.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub average_latency_ms: f64,
    /// RFC 3339, empty before the first request.
    pub last_request_time: String,
    pub currently_processing: i64,
    pub success_rate: f64,
    pub latency_breakdown: LatencyBreakdown,
    pub latency_history: Vec<HistoryEntry>,
    pub driver: &'static str,
    pub dispatch_policy: &'static str,
    pub in_flight_capacity: usize,
    pub batch_order: &'static str,
    pub channel: ChannelStats,
}

impl StatsReport {
    pub fn build(snapshot: &StatsSnapshot, dispatcher: &Dispatcher, channel: ChannelStats) -> Self {
        Self {
            total_requests: snapshot.total_requests,
            success_requests: snapshot.success_requests,
            failed_requests: snapshot.failed_requests,
            rejected_requests: snapshot.rejected_requests,
            average_latency_ms: snapshot.average_latency_ms,
            last_request_time: snapshot
                .last_request_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            currently_processing: snapshot.currently_processing,
            success_rate: snapshot.success_rate(),
            latency_breakdown: LatencyBreakdown {
                queue_ms: snapshot.average_queue_ms,
                process_ms: snapshot.average_process_ms,
                network_ms: snapshot.average_network_ms,
            },
            latency_history: snapshot.history.iter().map(HistoryEntry::from).collect(),
            driver: dispatcher.driver_kind().as_str(),
            dispatch_policy: dispatcher.policy().name(),
            in_flight_capacity: dispatcher.policy().capacity(),
            batch_order: dispatcher.config().batch_order.as_str(),
            channel,
        }
    }
}

async fn stats(State(state): State<ApiState>) -> Json<StatsReport> {
    let snapshot = state.dispatcher.telemetry().snapshot();
    Json(StatsReport::build(
        &snapshot,
        &state.dispatcher,
        state.channel.stats(),
    ))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Server ────────────────────────────────────────────────────────────────────

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/press", get(press).post(press))
        .route("/press-sync", get(press_sync).post(press_sync))
        .route("/actions", post(actions))
        .route("/type", post(type_text))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API on `listener` in a background task.
///
/// Returns the bound address and a sender that stops the server gracefully.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let addr = listener.local_addr()?;
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    info!("HTTP API listening on http://{addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("HTTP API shutting down");
            })
            .await
        {
            error!("HTTP server error: {e}");
        }
    });

    Ok((addr, shutdown_tx))
}

/// Binds `addr` and serves the API.
pub async fn run(addr: SocketAddr, state: ApiState) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    serve(listener, state).await
}
