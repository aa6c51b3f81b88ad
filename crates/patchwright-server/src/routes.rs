use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use patchwright_core::{
    stream::{TaskStreamManager, STREAM_END_LINE},
    Destination, Task,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{error::AppError, logging::LogRing};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "webhook-signature";
pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const SERVER_HOST_HEADER: &str = "x-automa-server-host";
pub const TASK_CREATED: &str = "task.created";

/// A verified `task.created` delivery waiting for a worker.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub job_id: String,
    pub destination: Destination,
    pub task: Task,
}

pub struct AppState {
    pub webhook_secret: String,
    pub jobs: mpsc::UnboundedSender<TaskJob>,
    pub streams: Arc<TaskStreamManager>,
    pub log_tx: broadcast::Sender<String>,
    pub log_ring: LogRing,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hooks/automa", post(automa_webhook))
        .route("/api/health", get(health))
        .route("/api/tasks/:id/stream", get(sse_task_stream))
        .route("/api/logs", get(sse_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Webhook ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct TaskCreatedData {
    task: Task,
}

/// Checks a lowercase-hex HMAC-SHA256 of `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) async fn automa_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let webhook_id = header(&headers, WEBHOOK_ID_HEADER).unwrap_or_default();
    let signature = header(&headers, SIGNATURE_HEADER).unwrap_or_default();

    if !verify_signature(&state.webhook_secret, &body, signature) {
        warn!(webhook_id, signature, "Invalid signature");
        return Err(AppError::Unauthorized("invalid signature".into()));
    }
    info!(webhook_id, "Webhook verified");

    let payload: WebhookPayload = serde_json::from_slice(&body)?;
    if payload.kind != TASK_CREATED {
        debug!(webhook_id, kind = %payload.kind, "ignoring webhook");
        return Ok(StatusCode::OK);
    }

    let server_host = header(&headers, SERVER_HOST_HEADER)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing {SERVER_HOST_HEADER} header")))?;
    let data: TaskCreatedData = serde_json::from_value(payload.data)?;

    let job = TaskJob {
        job_id: format!("{}-{}", data.task.id, Utc::now().timestamp_millis()),
        destination: Destination::new(server_host),
        task: data.task,
    };
    info!(task_id = job.task.id, job_id = %job.job_id, destination = %job.destination.base_url, "queueing task");

    state
        .jobs
        .send(job)
        .map_err(|_| AppError::Internal("task queue is closed".into()))?;
    Ok(StatusCode::OK)
}

// ── Health ────────────────────────────────────────────────────────────────

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── SSE ───────────────────────────────────────────────────────────────────

fn forward_live(
    tx: mpsc::UnboundedSender<String>,
    history: Vec<String>,
    live_rx: Option<broadcast::Receiver<String>>,
) {
    tokio::spawn(async move {
        for line in history {
            if tx.send(line).is_err() {
                return;
            }
        }
        let Some(mut live_rx) = live_rx else {
            return;
        };
        loop {
            match live_rx.recv().await {
                Ok(line) => {
                    let ended = line == STREAM_END_LINE;
                    if tx.send(line).is_err() || ended {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

fn sse_response(
    rx: mpsc::UnboundedReceiver<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx)
        .map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}

// Replays log history, then streams live events.
pub(crate) async fn sse_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    // Subscribe before snapshotting the ring so nothing falls in between.
    let live_rx = state.log_tx.subscribe();
    let history: Vec<String> = state
        .log_ring
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .cloned()
        .collect();
    forward_live(tx, history, Some(live_rx));
    sse_response(rx)
}

pub(crate) async fn sse_task_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let sub = state.streams.subscribe(id).await;
    forward_live(tx, sub.history, sub.live);
    sse_response(rx)
}
