//! Drains an upstream SSE response, repacks chat-completion deltas into
//! small sub-chunks, and paces their emission to the client at an adaptively
//! estimated character rate. Records the outcome into the history log on
//! shutdown, including on client disconnect.

use crate::sse::{self, SseRecord};
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uniway_core::history::HistoryLog;
use uniway_core::model::{HistoryWindow, RequestRecord};

const QUEUE_CAPACITY: usize = 256;
const SUBCHUNK_CHARS: usize = 3;
const INITIAL_IDEAL_SPEED: f64 = 20.0;
const MIN_SPEED: f64 = 5.0;
const MAX_SPEED: f64 = 100.0;
const MEASURE_THRESHOLD_CHARS: usize = 20;

struct SharedState {
    total_chars: AtomicUsize,
    first_drain: Mutex<Option<Instant>>,
    upstream_complete: AtomicBool,
    first_token_rt_ms: AtomicI64,
}

impl SharedState {
    fn new() -> Self {
        Self {
            total_chars: AtomicUsize::new(0),
            first_drain: Mutex::new(None),
            upstream_complete: AtomicBool::new(false),
            first_token_rt_ms: AtomicI64::new(-1),
        }
    }

    fn note_drain(&self, now: Instant, request_start: Instant, chars: usize) {
        self.total_chars.fetch_add(chars, Ordering::Relaxed);
        let mut first = self.first_drain.lock().expect("lock not poisoned");
        if first.is_none() {
            *first = Some(now);
            self.first_token_rt_ms
                .store(now.duration_since(request_start).as_millis() as i64, Ordering::Relaxed);
        }
    }
}

/// Start draining `upstream` and return the paced SSE text stream to hand to
/// the client response. Each yielded item is a complete `data: ...\n\n` (or
/// `[DONE]\n\n`) record ready to write. A non-2xx `upstream` is surfaced as a
/// single mid-stream SSE error record rather than rejected up front, so the
/// caller can always drive the response through this same streaming path and
/// the outcome (including the failure) still lands in the history log.
pub fn start(
    upstream: reqwest::Response,
    request_start: Instant,
    budget: Duration,
    history: Arc<HistoryLog>,
    history_key: String,
    prior_window: HistoryWindow,
) -> impl Stream<Item = String> + Send {
    let (tx, rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
    let shared = Arc::new(SharedState::new());

    tokio::spawn(drain_loop(upstream, tx, shared.clone(), request_start));

    emit_stream(rx, shared, request_start, budget, history, history_key, prior_window)
}

async fn drain_loop(
    upstream: reqwest::Response,
    tx: mpsc::Sender<String>,
    shared: Arc<SharedState>,
    request_start: Instant,
) {
    use tokio_stream::StreamExt;

    if !upstream.status().is_success() {
        let status = upstream.status().as_u16();
        let body = upstream.bytes().await.unwrap_or_default();
        let message = String::from_utf8_lossy(&body);
        tracing::warn!(status, "upstream returned non-2xx for streaming request");
        let payload = serde_json::json!({"error": {"message": message, "type": "upstream_error", "code": status}});
        let _ = tx.send(format!("data: {payload}\n\n")).await;
        let _ = tx.send("data: [DONE]\n\n".to_string()).await;
        shared.upstream_complete.store(true, Ordering::Release);
        return;
    }

    let mut records = sse::parse_sse_stream(upstream.bytes_stream());
    let mut finish_reason_emitted = false;
    let mut done_emitted = false;
    let mut last_id = String::new();
    let mut last_model = String::new();

    while let Some(item) = records.next().await {
        let record = match item {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "upstream stream error");
                let payload = serde_json::json!({"error": {"message": e.to_string(), "type": "upstream_error"}});
                if tx.send(format!("data: {payload}\n\n")).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match record {
            SseRecord::Opaque(data) => {
                shared.note_drain(Instant::now(), request_start, data.len());
                if data == "[DONE]" {
                    done_emitted = true;
                }
                if tx.send(format!("data: {data}\n\n")).await.is_err() {
                    break;
                }
            }
            SseRecord::Delta {
                json,
                content,
                reasoning_content,
                finish_reason,
            } => {
                if let Some(id) = json.get("id").and_then(|v| v.as_str()) {
                    last_id = id.to_string();
                }
                if let Some(model) = json.get("model").and_then(|v| v.as_str()) {
                    last_model = model.to_string();
                }

                let content_chunks = split_subchunks(content.as_deref().unwrap_or(""));
                let reasoning_chunks = split_subchunks(reasoning_content.as_deref().unwrap_or(""));
                let total = content_chunks.len() + reasoning_chunks.len();

                if total == 0 {
                    // No delta text at all; forward the record once, carrying finish_reason if present.
                    let out = build_delta_json(&json, "content", "", finish_reason.as_deref());
                    shared.note_drain(Instant::now(), request_start, 0);
                    if finish_reason.is_some() {
                        finish_reason_emitted = true;
                    }
                    if tx.send(format!("data: {out}\n\n")).await.is_err() {
                        break;
                    }
                    continue;
                }

                let mut sent = 0usize;
                for chunk in &content_chunks {
                    sent += 1;
                    let is_last = sent == total;
                    let fr = if is_last { finish_reason.as_deref() } else { None };
                    let out = build_delta_json(&json, "content", chunk, fr);
                    shared.note_drain(Instant::now(), request_start, chunk.chars().count());
                    if is_last && fr.is_some() {
                        finish_reason_emitted = true;
                    }
                    if tx.send(format!("data: {out}\n\n")).await.is_err() {
                        return;
                    }
                }
                for chunk in &reasoning_chunks {
                    sent += 1;
                    let is_last = sent == total;
                    let fr = if is_last { finish_reason.as_deref() } else { None };
                    let out = build_delta_json(&json, "reasoning_content", chunk, fr);
                    shared.note_drain(Instant::now(), request_start, chunk.chars().count());
                    if is_last && fr.is_some() {
                        finish_reason_emitted = true;
                    }
                    if tx.send(format!("data: {out}\n\n")).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !finish_reason_emitted {
        let synthetic = serde_json::json!({
            "id": last_id,
            "object": "chat.completion.chunk",
            "model": last_model,
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        });
        let _ = tx.send(format!("data: {synthetic}\n\n")).await;
    }
    if !done_emitted {
        let _ = tx.send("data: [DONE]\n\n".to_string()).await;
    }

    shared.upstream_complete.store(true, Ordering::Release);
}

/// Split `text` into chunks of at most `SUBCHUNK_CHARS` characters, preserving order.
fn split_subchunks(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(SUBCHUNK_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

/// Clone `id`/`object`/`created`/`model` from `template` and set
/// `choices[0].delta.<field>` and, when present, `finish_reason`.
fn build_delta_json(template: &Value, field: &str, text: &str, finish_reason: Option<&str>) -> Value {
    let id = template.get("id").cloned().unwrap_or(Value::Null);
    let object = template.get("object").cloned().unwrap_or(Value::Null);
    let created = template.get("created").cloned().unwrap_or(Value::Null);
    let model = template.get("model").cloned().unwrap_or(Value::Null);

    serde_json::json!({
        "id": id,
        "object": object,
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { field: text },
            "finish_reason": finish_reason,
        }],
    })
}

struct EmitState {
    rx: mpsc::Receiver<String>,
    shared: Arc<SharedState>,
    ideal_speed: f64,
    last_emit: Option<Instant>,
    request_start: Instant,
    budget: Duration,
    _outcome_guard: OutcomeGuard,
}

fn emit_stream(
    rx: mpsc::Receiver<String>,
    shared: Arc<SharedState>,
    request_start: Instant,
    budget: Duration,
    history: Arc<HistoryLog>,
    history_key: String,
    prior_window: HistoryWindow,
) -> Pin<Box<dyn Stream<Item = String> + Send>> {
    let outcome_guard = OutcomeGuard {
        history,
        key: history_key,
        prior: prior_window,
        shared: shared.clone(),
        recorded: false,
    };

    let state = EmitState {
        rx,
        shared,
        ideal_speed: INITIAL_IDEAL_SPEED,
        last_emit: None,
        request_start,
        budget,
        _outcome_guard: outcome_guard,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        let item = state.rx.recv().await?;

        let remaining = state
            .budget
            .checked_sub(state.request_start.elapsed())
            .unwrap_or(Duration::ZERO);
        let upstream_done = state.shared.upstream_complete.load(Ordering::Acquire);
        let no_delay = upstream_done || remaining < Duration::from_secs(3);

        if !no_delay {
            let total_chars = state.shared.total_chars.load(Ordering::Relaxed);
            if total_chars >= MEASURE_THRESHOLD_CHARS {
                let first_drain = *state.shared.first_drain.lock().expect("lock not poisoned");
                if let Some(first) = first_drain {
                    let elapsed = first.elapsed().as_secs_f64().max(0.001);
                    let measured = (total_chars as f64 / elapsed).clamp(MIN_SPEED, MAX_SPEED);
                    state.ideal_speed = 0.7 * measured + 0.3 * state.ideal_speed;
                }
            }

            if remaining < Duration::from_secs(10) && !upstream_done {
                state.ideal_speed = (state.ideal_speed * 2.0).min(MAX_SPEED);
            }

            let target_interval = Duration::from_secs_f64(SUBCHUNK_CHARS as f64 / state.ideal_speed);
            if let Some(last) = state.last_emit {
                let since = last.elapsed();
                if since < target_interval {
                    tokio::time::sleep(target_interval - since).await;
                }
            }
        }

        state.last_emit = Some(Instant::now());
        Some((item, state))
    }))
}

/// Records the request outcome into the history log when the emitter is
/// dropped, whether it ran to completion or was cut short by a disconnect.
struct OutcomeGuard {
    history: Arc<HistoryLog>,
    key: String,
    prior: HistoryWindow,
    shared: Arc<SharedState>,
    recorded: bool,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let history = self.history.clone();
        let key = std::mem::take(&mut self.key);
        let prior = std::mem::take(&mut self.prior);
        let first_token_rt = self.shared.first_token_rt_ms.load(Ordering::Relaxed);

        tokio::spawn(async move {
            let record = RequestRecord {
                request_id: uuid::Uuid::new_v4().to_string(),
                request_time: chrono::Utc::now().timestamp_millis(),
                request_success: first_token_rt >= 0,
                first_token_rt,
                is_streaming: true,
                request_type: "chat".to_string(),
            };
            history.append(&key, record, prior).await;
        });
    }
}
