pub mod admin;
pub mod chat_completions;
pub mod health;
pub mod models;

use bytes::Bytes;
use uniway_core::error::ProxyError;

pub(crate) struct ParsedRequest {
    pub model: String,
    pub stream: bool,
}

pub(crate) fn parse_request(body: &Bytes) -> Result<ParsedRequest, ProxyError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let model = value
        .get("model")
        .and_then(|m| m.as_str())
        .ok_or_else(|| ProxyError::BadRequest("missing model field".into()))?
        .to_string();

    let stream = value
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    Ok(ParsedRequest { model, stream })
}
