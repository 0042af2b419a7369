use crate::AppState;
use axum::{extract::State, http::Request, middleware::Next, response::Response};
use uniway_core::error::ProxyError;

fn bearer_token<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn cookie_value<'a, B>(request: &'a Request<B>, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|pair| {
                let pair = pair.trim();
                let (k, v) = pair.split_once('=')?;
                (k == name).then_some(v)
            })
        })
}

/// Admits the admin key or any configured tenant key; rejects everything else.
pub async fn tenant_auth_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ProxyError> {
    let config = state.config.load();
    match bearer_token(&request) {
        Some(token) if token == config.admin_api_key => Ok(next.run(request).await),
        Some(token) if config.tenant_api_keys.contains(token) => Ok(next.run(request).await),
        _ => Err(ProxyError::Unauthorized("missing or invalid bearer token".to_string())),
    }
}

/// Admits the admin key (via bearer or the `auth_key` cookie); tenant keys
/// are recognized but rejected with 403, not treated as unknown.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ProxyError> {
    let config = state.config.load();

    if cookie_value(&request, "auth_key") == Some(config.admin_api_key.as_str()) {
        return Ok(next.run(request).await);
    }

    match bearer_token(&request) {
        Some(token) if token == config.admin_api_key => Ok(next.run(request).await),
        Some(token) if config.tenant_api_keys.contains(token) => {
            Err(ProxyError::Forbidden("tenant key cannot access admin routes".to_string()))
        }
        _ => Err(ProxyError::Unauthorized("missing or invalid bearer token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_with_bearer(token: &str) -> Request<axum::body::Body> {
        Request::builder()
            .header("authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn bearer_token_extracts_from_authorization_header() {
        let req = req_with_bearer("sk-abc");
        assert_eq!(bearer_token(&req), Some("sk-abc"));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn cookie_value_finds_named_cookie_among_several() {
        let req = Request::builder()
            .header("cookie", "a=1; auth_key=admin123; b=2")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(cookie_value(&req, "auth_key"), Some("admin123"));
    }
}
