use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use uniway_core::error::ProxyError;

/// Build an SSE response from a stream of pre-formatted `data: ...\n\n` text.
/// Splits multi-line output into individual events and surfaces emitter
/// errors as a single error event rather than resetting the connection.
pub fn build_sse_response(
    data_stream: impl Stream<Item = Result<String, ProxyError>> + Send + 'static,
    keepalive_seconds: u64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = data_stream
        .filter_map(|result| async move {
            match result {
                Ok(data) if data.is_empty() => None,
                Ok(data) => Some(Ok(data)),
                Err(e) => Some(Err(e)),
            }
        })
        .flat_map(|result| {
            let items: Vec<Result<Event, Infallible>> = match result {
                Ok(data) => data
                    .split('\n')
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| {
                        if let Some(rest) = line.strip_prefix("data: ") {
                            Ok(Event::default().data(rest))
                        } else if let Some(rest) = line.strip_prefix("event: ") {
                            Ok(Event::default().event(rest))
                        } else {
                            Ok(Event::default().data(line))
                        }
                    })
                    .collect(),
                Err(e) => {
                    let error_json = serde_json::json!({"error": {"message": e.to_string()}});
                    vec![Ok(Event::default().data(error_json.to_string()))]
                }
            };
            futures::stream::iter(items)
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(keepalive_seconds)).text(""))
}
