//! Parses an upstream byte stream into SSE records, classifying each as an
//! opaque passthrough or a chat-completion delta worth repacking.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use tokio_stream::StreamExt;
use uniway_core::error::ProxyError;

/// One parsed SSE record. Records that aren't `data:` chat-completion deltas
/// (comments, `[DONE]`, unparseable JSON) pass through untouched.
#[derive(Debug, Clone)]
pub enum SseRecord {
    Opaque(String),
    Delta {
        json: Value,
        content: Option<String>,
        reasoning_content: Option<String>,
        finish_reason: Option<String>,
    },
}

pub fn parse_sse_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<SseRecord, ProxyError>> + Send>> {
    Box::pin(async_stream(byte_stream))
}

struct SseState {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
}

fn async_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<SseRecord, ProxyError>> + Send {
    futures::stream::unfold(
        SseState {
            stream: Box::pin(byte_stream),
            buffer: String::new(),
        },
        |mut state| async move {
            loop {
                if let Some(pos) = find_event_boundary(&state.buffer) {
                    let skip = if state.buffer[pos..].starts_with("\r\n\r\n") {
                        4
                    } else {
                        2
                    };
                    let block = state.buffer[..pos].to_string();
                    state.buffer = state.buffer[pos + skip..].to_string();

                    if let Some(data) = parse_event_block(&block) {
                        return Some((Ok(classify(data)), state));
                    }
                    continue;
                }

                match state.stream.next().await {
                    Some(Ok(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => state.buffer.push_str(text),
                        Err(e) => {
                            return Some((
                                Err(ProxyError::Internal(format!(
                                    "invalid UTF-8 in SSE stream: {e}"
                                ))),
                                state,
                            ));
                        }
                    },
                    Some(Err(e)) => {
                        return Some((Err(ProxyError::Transport(e.to_string())), state));
                    }
                    None => {
                        if !state.buffer.trim().is_empty() {
                            let block = std::mem::take(&mut state.buffer);
                            if let Some(data) = parse_event_block(&block) {
                                return Some((Ok(classify(data)), state));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

fn find_event_boundary(s: &str) -> Option<usize> {
    match (s.find("\n\n"), s.find("\r\n\r\n")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_event_block(block: &str) -> Option<String> {
    let mut data_lines: Vec<String> = Vec::new();

    for line in block.lines() {
        let line = line.trim_start_matches('\r');
        if line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(data_lines.join("\n"))
}

/// Turns a raw `data:` payload into an opaque passthrough or a parsed delta.
fn classify(data: String) -> SseRecord {
    if data == "[DONE]" {
        return SseRecord::Opaque(data);
    }

    let json: Value = match serde_json::from_str(&data) {
        Ok(v) => v,
        Err(_) => return SseRecord::Opaque(data),
    };

    let choice = json.get("choices").and_then(|c| c.get(0));
    let delta = choice.and_then(|c| c.get("delta"));
    let content = delta
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let reasoning_content = delta
        .and_then(|d| d.get("reasoning_content"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    SseRecord::Delta {
        json,
        content,
        reasoning_content,
        finish_reason,
    }
}
