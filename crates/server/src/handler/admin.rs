use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uniway_core::error::ProxyError;
use uniway_core::model::UpstreamConfig;

pub async fn list_configs(State(state): State<AppState>) -> Result<impl IntoResponse, ProxyError> {
    let configs = state.store.list_configs().await?;
    let masked: Vec<_> = configs.iter().map(UpstreamConfig::to_masked_json).collect();
    Ok(Json(masked))
}

pub async fn create_config(
    State(state): State<AppState>,
    Json(config): Json<UpstreamConfig>,
) -> Result<impl IntoResponse, ProxyError> {
    let created = state.store.create_config(config).await?;
    Ok(Json(created.to_masked_json()))
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    let config = state.store.get_config(&id).await?;
    Ok(Json(config.to_masked_json()))
}

pub async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<UpstreamConfig>,
) -> Result<impl IntoResponse, ProxyError> {
    let updated = state.store.update_config(&id, config).await?;
    Ok(Json(updated.to_masked_json()))
}

pub async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    state.store.delete_config(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_mappings(State(state): State<AppState>) -> Result<impl IntoResponse, ProxyError> {
    let mappings = state.store.global_mappings().await?;
    Ok(Json(mappings))
}

#[derive(serde::Deserialize)]
pub struct UpsertMapping {
    unified_name: String,
    #[serde(flatten)]
    vendor_map: std::collections::HashMap<String, String>,
}

pub async fn upsert_mapping(
    State(state): State<AppState>,
    Json(body): Json<UpsertMapping>,
) -> Result<impl IntoResponse, ProxyError> {
    state
        .store
        .upsert_mapping(&body.unified_name, body.vendor_map)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    Path(unified_name): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    state.store.delete_mapping(&unified_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /login` stub — a templating layer would render the login page here.
pub async fn get_login() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

/// `GET /admin` stub — a templating layer would render the admin page here.
pub async fn get_admin_page() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

/// `POST /admin` — sets the `auth_key` cookie when the submitted key matches
/// the admin key.
pub async fn post_admin_login(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Response, ProxyError> {
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    let key = value
        .get("key")
        .and_then(|k| k.as_str())
        .ok_or_else(|| ProxyError::BadRequest("missing key field".into()))?;

    if key != state.config.load().admin_api_key {
        return Err(ProxyError::Unauthorized("invalid admin key".to_string()));
    }

    let cookie = format!("auth_key={key}; Path=/; HttpOnly; SameSite=Strict");
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(serde_json::json!({"ok": true}))).into_response())
}

pub async fn logout() -> Response {
    let cookie = "auth_key=; Path=/; Max-Age=0";
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(serde_json::json!({"ok": true}))).into_response()
}
