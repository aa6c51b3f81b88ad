use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::broadcast;

pub const LOG_RING_CAPACITY: usize = 500;

pub type LogRing = Arc<Mutex<VecDeque<String>>>;

/// Mirrors log events as JSON lines into a broadcast channel and a bounded
/// history, for `GET /api/logs`.
pub struct BroadcastLayer {
    pub tx: broadcast::Sender<String>,
    pub ring: LogRing,
}

impl BroadcastLayer {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self {
            tx,
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY))),
        }
    }
}

struct MessageVisitor<'a> {
    message: &'a mut String,
    task_id: &'a mut Option<i64>,
}

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        if field.name() == "task_id" {
            *self.task_id = Some(value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message.clear();
            use std::fmt::Write;
            let _ = write!(self.message, "{value:?}");
            // Debug on &str adds quotes
            if self.message.len() >= 2 && self.message.starts_with('"') && self.message.ends_with('"') {
                *self.message = self.message[1..self.message.len() - 1].to_string();
            }
        }
    }
}

fn category(target: &str) -> &'static str {
    if target.contains("pipeline") || target.contains("outcome") || target.contains("worker") {
        "pipeline"
    } else if target.starts_with("patchwright_agent") || target.contains("agent") {
        "agent"
    } else if target.contains("code_host") {
        "code_host"
    } else if target.starts_with("tower_http") {
        "http"
    } else {
        "system"
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for BroadcastLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => "err",
            tracing::Level::WARN => "warn",
            tracing::Level::INFO => "info",
            tracing::Level::DEBUG => "debug",
            tracing::Level::TRACE => return,
        };

        let mut message = String::new();
        let mut task_id = None;
        event.record(&mut MessageVisitor {
            message: &mut message,
            task_id: &mut task_id,
        });

        let json = serde_json::json!({
            "ts": chrono::Utc::now().timestamp(),
            "level": level,
            "message": message,
            "category": category(event.metadata().target()),
            "task_id": task_id,
        })
        .to_string();

        let _ = self.tx.send(json.clone());
        if let Ok(mut ring) = self.ring.lock() {
            ring.push_back(json);
            if ring.len() > LOG_RING_CAPACITY {
                ring.pop_front();
            }
        }
    }
}
