//! Builds and issues the upstream HTTP request: URL composition, header
//! scrubbing, and the `model` field rewrite.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, HOST};
use std::time::Duration;
use uniway_core::error::ProxyError;

/// Compose the upstream chat-completions URL from a config's `base_url`.
///
/// - ends with `#` → strip it, use as-is.
/// - ends with `/` → append `chat/completions`.
/// - otherwise → append `/v1/chat/completions`.
pub fn compose_upstream_url(base_url: &str) -> String {
    if let Some(stripped) = base_url.strip_suffix('#') {
        stripped.to_string()
    } else if let Some(stripped) = base_url.strip_suffix('/') {
        format!("{stripped}/chat/completions")
    } else {
        format!("{base_url}/v1/chat/completions")
    }
}

/// Rewrite the body's `model` field to `actual_model` when it differs from
/// the client-requested name. Returns the original bytes unchanged when no
/// rewrite is needed.
pub fn rewrite_model_field(body: &[u8], actual_model: &str) -> Result<Vec<u8>, ProxyError> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    let needs_rewrite = value
        .get("model")
        .and_then(|m| m.as_str())
        .map(|m| m != actual_model)
        .unwrap_or(true);

    if !needs_rewrite {
        return Ok(body.to_vec());
    }

    value["model"] = serde_json::Value::String(actual_model.to_string());
    Ok(serde_json::to_vec(&value)?)
}

/// Copy the inbound headers, scrub `Host`/`Authorization`/`Content-Length`,
/// then set a fresh `Authorization` for the chosen upstream and a
/// `Content-Length` matching `body_len`.
pub fn scrub_and_sign_headers(
    inbound: &HeaderMap,
    api_key: &str,
    body_len: usize,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if name == HOST || name == AUTHORIZATION || name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| ProxyError::Internal(format!("invalid api key header: {e}")))?;
    headers.insert(AUTHORIZATION, auth_value);
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&body_len.to_string()).expect("decimal length is valid ASCII"),
    );

    Ok(headers)
}

pub struct PreparedRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Assemble the outbound request for a chosen (config, actual-model) pair.
pub fn prepare(
    base_url: &str,
    api_key: &str,
    actual_model: &str,
    inbound_headers: &HeaderMap,
    inbound_body: &[u8],
) -> Result<PreparedRequest, ProxyError> {
    let body = rewrite_model_field(inbound_body, actual_model)?;
    let headers = scrub_and_sign_headers(inbound_headers, api_key, body.len())?;
    let url = compose_upstream_url(base_url);
    Ok(PreparedRequest { url, headers, body })
}

/// Issue the prepared request, following redirects, bound by `timeout`.
pub async fn execute(
    client: &reqwest::Client,
    prepared: &PreparedRequest,
    timeout: Duration,
) -> Result<reqwest::Response, ProxyError> {
    client
        .post(&prepared.url)
        .headers(prepared.headers.clone())
        .body(Bytes::from(prepared.body.clone()))
        .timeout(timeout)
        .send()
        .await
        .map_err(ProxyError::from)
}

/// Extract response headers into an owned map for relaying downstream.
pub fn extract_headers(resp: &reqwest::Response) -> HeaderMap {
    resp.headers().clone()
}

/// Reject a non-2xx non-streaming response, surfacing the upstream body.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProxyError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.bytes().await.unwrap_or_default();
    Err(ProxyError::Upstream {
        status,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

/// A header name safe to forward without further inspection. Kept as a named
/// helper so callers reviewing scrub logic can see the excluded set in one
/// place alongside the implementation above.
pub fn is_scrubbed(name: &HeaderName) -> bool {
    *name == HOST || *name == AUTHORIZATION || *name == CONTENT_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_hash_suffix_strips_and_uses_as_is() {
        assert_eq!(compose_upstream_url("https://api.example.com/custom#"), "https://api.example.com/custom");
    }

    #[test]
    fn url_slash_suffix_appends_chat_completions() {
        assert_eq!(
            compose_upstream_url("https://api.example.com/"),
            "https://api.example.com/chat/completions"
        );
    }

    #[test]
    fn url_bare_host_appends_v1_chat_completions() {
        assert_eq!(
            compose_upstream_url("https://api.example.com"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn url_never_doubles_slash_or_hash() {
        for base in ["https://a.com#", "https://a.com/", "https://a.com"] {
            let url = compose_upstream_url(base);
            assert!(!url.contains("##"));
            assert!(!url.contains("//chat"));
        }
    }

    #[test]
    fn rewrite_model_field_changes_mismatched_model() {
        let body = br#"{"model":"gpt-x","messages":[]}"#;
        let rewritten = rewrite_model_field(body, "mini").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(value["model"], "mini");
    }

    #[test]
    fn rewrite_model_field_is_noop_when_already_matching() {
        let body = br#"{"model":"mini","messages":[]}"#;
        let rewritten = rewrite_model_field(body, "mini").unwrap();
        assert_eq!(rewritten, body);
    }

    #[test]
    fn scrub_removes_host_auth_and_content_length() {
        let mut inbound = HeaderMap::new();
        inbound.insert(HOST, HeaderValue::from_static("client.local"));
        inbound.insert(AUTHORIZATION, HeaderValue::from_static("Bearer client-key"));
        inbound.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        inbound.insert("x-request-id", HeaderValue::from_static("abc"));

        let out = scrub_and_sign_headers(&inbound, "sk-upstream", 42).unwrap();
        assert_eq!(out.get(AUTHORIZATION).unwrap(), "Bearer sk-upstream");
        assert_eq!(out.get(CONTENT_LENGTH).unwrap(), "42");
        assert!(out.get(HOST).is_none());
        assert_eq!(out.get("x-request-id").unwrap(), "abc");
        assert_eq!(out.iter().filter(|(n, _)| **n == AUTHORIZATION).count(), 1);
        assert_eq!(out.iter().filter(|(n, _)| **n == CONTENT_LENGTH).count(), 1);
    }
}
