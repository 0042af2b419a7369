use crate::AppState;
use crate::streaming::build_sse_response;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;
use uniway_core::catalog::{self, Candidate};
use uniway_core::error::ProxyError;
use uniway_core::history;
use uniway_core::model::RequestRecord;
use uniway_core::selector;
use uniway_relay::{paced_emitter, relay};

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let parsed = super::parse_request(&body)?;
    let configs = state.store.list_configs().await?;
    let candidates = catalog::resolve_candidates(&configs, &parsed.model)?;

    let key_of = |c: &Candidate| history::history_key(&c.config.id, &c.actual_model);
    let keys: Vec<String> = candidates.iter().map(key_of).collect();
    let histories = state.history.batch_load(&keys).await;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let filtered = selector::filter_circuit_broken(candidates, &histories, key_of, now_ms);

    let chosen = {
        let mut rng = rand::rng();
        selector::weighted_pick(&filtered, &histories, key_of, &mut rng).clone()
    };
    let chosen_key = key_of(&chosen);
    let prior = histories.get(&chosen_key).cloned().unwrap_or_default();

    let request_start = Instant::now();
    let prepared = relay::prepare(
        &chosen.config.base_url,
        &chosen.config.api_key,
        &chosen.actual_model,
        &headers,
        &body,
    )?;

    let timeout = Duration::from_secs(state.config.load().timeout_seconds);
    let resp = relay::execute(&state.http_client, &prepared, timeout).await?;

    if parsed.stream {
        // A non-2xx upstream response is not rejected here: it still needs to
        // reach the client as a mid-stream SSE error record (not a plain HTTP
        // error) and still needs a failure `RequestRecord` appended, both of
        // which `paced_emitter::start` takes care of via its `OutcomeGuard`.
        let output = paced_emitter::start(
            resp,
            request_start,
            timeout,
            state.history.clone(),
            chosen_key,
            prior,
        );
        let text_stream = output.map(Ok::<String, ProxyError>);
        Ok(build_sse_response(text_stream, 15).into_response())
    } else {
        let resp = match relay::check_status(resp).await {
            Ok(r) => r,
            Err(e) => {
                let record = RequestRecord::new(now_ms, false, "chat");
                state.history.append(&chosen_key, record, prior).await;
                return Err(e);
            }
        };

        let status = resp.status();
        let headers_out = relay::extract_headers(&resp);
        let body_bytes = resp.bytes().await?;

        let mut record = RequestRecord::new(now_ms, false, "chat");
        record.request_success = status.is_success();
        record.first_token_rt = if status.is_success() {
            request_start.elapsed().as_millis() as i64
        } else {
            -1
        };
        state.history.append(&chosen_key, record, prior).await;

        let mut response = (status, body_bytes).into_response();
        *response.headers_mut() = headers_out;
        Ok(response)
    }
}
