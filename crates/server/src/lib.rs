pub mod auth;
pub mod handler;
pub mod store;
pub mod streaming;

pub mod middleware {
    pub mod request_context;
    pub mod request_logging;
}

use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uniway_core::config::Config;
use uniway_core::history::HistoryLog;

use crate::store::ConfigStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub store: Arc<ConfigStore>,
    pub history: Arc<HistoryLog>,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let tenant_routes = Router::new()
        .route("/v1/chat/completions", axum::routing::post(handler::chat_completions::chat_completions))
        .route(
            "/v1/models",
            axum::routing::get(handler::models::list_models).post(handler::models::list_models),
        )
        .layer(axum_mw::from_fn_with_state(state.clone(), auth::tenant_auth_middleware));

    let admin_routes = Router::new()
        .route(
            "/api/configs",
            axum::routing::get(handler::admin::list_configs).post(handler::admin::create_config),
        )
        .route(
            "/api/configs/{id}",
            axum::routing::get(handler::admin::get_config)
                .put(handler::admin::update_config)
                .delete(handler::admin::delete_config),
        )
        .route(
            "/api/model-mappings",
            axum::routing::get(handler::admin::list_mappings).post(handler::admin::upsert_mapping),
        )
        .route(
            "/api/model-mappings/{unified_name}",
            axum::routing::delete(handler::admin::delete_mapping),
        )
        .route("/admin", axum::routing::get(handler::admin::get_admin_page).post(handler::admin::post_admin_login))
        .layer(axum_mw::from_fn_with_state(state.clone(), auth::admin_auth_middleware));

    let public_routes = Router::new()
        .route("/health", axum::routing::get(handler::health::health))
        .route("/login", axum::routing::get(handler::admin::get_login))
        .route("/logout", axum::routing::post(handler::admin::logout));

    Router::new()
        .merge(public_routes)
        .merge(tenant_routes)
        .merge(admin_routes)
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(axum_mw::from_fn(middleware::request_context::request_context_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
