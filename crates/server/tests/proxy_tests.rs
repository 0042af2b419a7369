//! End-to-end HTTP surface tests against an in-process server bound to an
//! ephemeral port, with a mock upstream standing in for the real provider.

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uniway_core::config::{Config, DaemonConfig};
use uniway_core::history::HistoryLog;
use uniway_core::kv::LocalKv;
use uniway_server::AppState;
use uniway_server::store::ConfigStore;

fn test_config(admin_key: &str, tenant_key: &str) -> Config {
    let mut tenant_api_keys = HashSet::new();
    tenant_api_keys.insert(tenant_key.to_string());
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_api_key: admin_key.to_string(),
        tenant_api_keys,
        timeout_seconds: 5,
        redis_url: None,
        environment: "test".to_string(),
        log_level: "error".to_string(),
        logging_to_file: false,
        log_dir: None,
        daemon: DaemonConfig::default(),
    }
}

async fn spawn_mock_upstream() -> String {
    use axum::{Json, Router, routing::post};

    async fn chat_completions() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 1,
            "model": "mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }]
        }))
    }

    let app = Router::new().route("/v1/chat/completions", post(chat_completions));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_failing_upstream() -> String {
    use axum::{Router, http::StatusCode, routing::post};

    async fn chat_completions() -> (StatusCode, String) {
        (StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#.to_string())
    }

    let app = Router::new().route("/v1/chat/completions", post(chat_completions));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_app(state: AppState) -> String {
    let router = uniway_server::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_endpoint_requires_no_auth() {
    let kv = Arc::new(LocalKv::new());
    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin", "tenant"))),
        store: Arc::new(ConfigStore::new(kv.clone())),
        history: Arc::new(HistoryLog::new(kv)),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn chat_completions_rejects_missing_bearer() {
    let kv = Arc::new(LocalKv::new());
    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin", "tenant"))),
        store: Arc::new(ConfigStore::new(kv.clone())),
        history: Arc::new(HistoryLog::new(kv)),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&serde_json::json!({"model": "gpt-x", "stream": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn chat_completions_direct_model_roundtrip() {
    let upstream_base = spawn_mock_upstream().await;

    let kv = Arc::new(LocalKv::new());
    let store = Arc::new(ConfigStore::new(kv.clone()));
    store
        .create_config(uniway_core::model::UpstreamConfig {
            id: String::new(),
            api_key: "sk-upstream".to_string(),
            base_url: upstream_base,
            models: vec!["gpt-x".to_string()],
            vendor: String::new(),
            model_mappings: Default::default(),
            created_at: String::new(),
        })
        .await
        .unwrap();

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin", "tenant"))),
        store,
        history: Arc::new(HistoryLog::new(kv)),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth("tenant")
        .json(&serde_json::json!({"model": "gpt-x", "stream": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");
}

#[tokio::test]
async fn chat_completions_streaming_upstream_error_is_an_sse_record_and_is_recorded() {
    let upstream_base = spawn_failing_upstream().await;

    let kv = Arc::new(LocalKv::new());
    let store = Arc::new(ConfigStore::new(kv.clone()));
    let history = Arc::new(HistoryLog::new(kv));
    store
        .create_config(uniway_core::model::UpstreamConfig {
            id: String::new(),
            api_key: "sk-upstream".to_string(),
            base_url: upstream_base,
            models: vec!["gpt-x".to_string()],
            vendor: String::new(),
            model_mappings: Default::default(),
            created_at: String::new(),
        })
        .await
        .unwrap();
    let config_id = store.list_configs().await.unwrap()[0].id.clone();

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin", "tenant"))),
        store,
        history: history.clone(),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth("tenant")
        .json(&serde_json::json!({"model": "gpt-x", "stream": true}))
        .send()
        .await
        .unwrap();

    // The failure surfaces as a 200 SSE response carrying an error record,
    // not a bare HTTP error status.
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("upstream_error"));
    assert!(body.contains("[DONE]"));

    // Give the detached OutcomeGuard task a chance to append the record.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let key = uniway_core::history::history_key(&config_id, "gpt-x");
    let window = history.batch_load(&[key.clone()]).await;
    let record = window.get(&key).unwrap().front().expect("a record was appended");
    assert!(!record.request_success);
    assert_eq!(record.first_token_rt, -1);
}

#[tokio::test]
async fn admin_routes_require_admin_key() {
    let kv = Arc::new(LocalKv::new());
    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin-secret", "tenant"))),
        store: Arc::new(ConfigStore::new(kv.clone())),
        history: Arc::new(HistoryLog::new(kv)),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/configs"))
        .bearer_auth("tenant")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(format!("{base}/api/configs"))
        .bearer_auth("admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn models_listing_aggregates_configured_models() {
    let kv = Arc::new(LocalKv::new());
    let store = Arc::new(ConfigStore::new(kv.clone()));
    store
        .create_config(uniway_core::model::UpstreamConfig {
            id: String::new(),
            api_key: "sk-upstream".to_string(),
            base_url: "http://localhost:9".to_string(),
            models: vec!["gpt-x".to_string()],
            vendor: String::new(),
            model_mappings: Default::default(),
            created_at: String::new(),
        })
        .await
        .unwrap();

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(test_config("admin", "tenant"))),
        store,
        history: Arc::new(HistoryLog::new(kv)),
        http_client: reqwest::Client::new(),
        start_time: Instant::now(),
    };
    let base = spawn_app(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/v1/models"))
        .bearer_auth("tenant")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gpt-x"));
}
