use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use uniway_core::{catalog, error::ProxyError};

pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, ProxyError> {
    let configs = state.store.list_configs().await?;
    let mappings = state.store.global_mappings().await?;
    let created = chrono::Utc::now().timestamp();

    let data: Vec<serde_json::Value> = catalog::list_models(&configs, &mappings, created)
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "object": m.object,
                "created": m.created,
                "owned_by": m.owned_by,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "object": "list",
        "data": data,
    })))
}
