//! Bounded, time-windowed request history per (upstream, actual-model) pair.

use crate::kv::KvStore;
use crate::model::{HISTORY_MAX_AGE_MS, HISTORY_MAX_RECORDS, HistoryWindow, RequestRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const HISTORY_TTL: Duration = Duration::from_secs(72 * 60 * 60);

/// Deterministic, fixed-length, opaque history key for one (config-id, model) pair.
pub fn history_key(config_id: &str, actual_model: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(format!("{config_id}-{actual_model}").as_bytes());
    format!("request_r_{:x}", hasher.finalize())
}

pub struct HistoryLog {
    kv: Arc<dyn KvStore>,
}

impl HistoryLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Load windows for a batch of keys in a single round trip. Absent or
    /// unparseable entries map to an empty window.
    pub async fn batch_load(&self, keys: &[String]) -> HashMap<String, HistoryWindow> {
        let values = match self.kv.mget(keys).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "history batch load failed, treating as empty");
                vec![None; keys.len()]
            }
        };

        keys.iter()
            .zip(values)
            .map(|(key, raw)| {
                let window = raw
                    .and_then(|bytes| serde_json::from_slice::<Vec<RequestRecord>>(&bytes).ok())
                    .map(std::collections::VecDeque::from)
                    .unwrap_or_default();
                (key.clone(), window)
            })
            .collect()
    }

    /// Prepend `record` to `prior`, trim by age and count, and persist.
    pub async fn append(
        &self,
        key: &str,
        record: RequestRecord,
        mut prior: HistoryWindow,
    ) -> HistoryWindow {
        prior.push_front(record);
        trim(&mut prior);

        let serialized: Vec<&RequestRecord> = prior.iter().collect();
        match serde_json::to_vec(&serialized) {
            Ok(bytes) => {
                if let Err(e) = self.kv.set(key, bytes, Some(HISTORY_TTL)).await {
                    tracing::warn!(error = %e, key, "failed to persist history window");
                }
            }
            Err(e) => tracing::warn!(error = %e, key, "failed to serialize history window"),
        }

        prior
    }
}

fn trim(window: &mut HistoryWindow) {
    let now = chrono::Utc::now().timestamp_millis();
    window.retain(|r| now - r.request_time <= HISTORY_MAX_AGE_MS);
    while window.len() > HISTORY_MAX_RECORDS {
        window.pop_back();
    }
}

/// Count the leading run of consecutive failures, newest first.
pub fn count_recent_consecutive_failures(window: &HistoryWindow) -> usize {
    window.iter().take_while(|r| !r.request_success).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::LocalKv;

    fn record(request_time: i64, success: bool) -> RequestRecord {
        RequestRecord {
            request_id: "r".into(),
            request_time,
            request_success: success,
            first_token_rt: if success { 100 } else { -1 },
            is_streaming: true,
            request_type: "chat".into(),
        }
    }

    #[test]
    fn history_key_is_stable_and_opaque() {
        let a = history_key("cfg-1", "gpt-x");
        let b = history_key("cfg-1", "gpt-x");
        assert_eq!(a, b);
        assert!(a.starts_with("request_r_"));
        assert_ne!(a, history_key("cfg-2", "gpt-x"));
    }

    #[tokio::test]
    async fn append_trims_by_count() {
        let log = HistoryLog::new(Arc::new(LocalKv::new()));
        let now = chrono::Utc::now().timestamp_millis();
        let mut window = HistoryWindow::new();
        for i in 0..60 {
            window = log
                .append("k", record(now - i, true), window)
                .await;
        }
        assert_eq!(window.len(), HISTORY_MAX_RECORDS);
        // Newest-first: the most recently appended record (i=59, earliest
        // timestamp pushed last) should not have displaced strictly newer ones.
        assert!(window[0].request_time >= window[window.len() - 1].request_time);
    }

    #[tokio::test]
    async fn append_trims_by_age() {
        let log = HistoryLog::new(Arc::new(LocalKv::new()));
        let now = chrono::Utc::now().timestamp_millis();
        let mut window = HistoryWindow::new();
        window = log.append("k", record(now - 73 * 60 * 60 * 1000, false), window).await;
        window = log.append("k", record(now, true), window).await;
        assert_eq!(window.len(), 1);
        assert!(window[0].request_success);
    }

    #[test]
    fn leading_failure_run_stops_at_first_success() {
        let mut window = HistoryWindow::new();
        window.push_back(record(3, false));
        window.push_back(record(2, false));
        window.push_back(record(1, true));
        window.push_back(record(0, false));
        assert_eq!(count_recent_consecutive_failures(&window), 2);
    }

    #[test]
    fn empty_history_has_zero_failure_run() {
        assert_eq!(count_recent_consecutive_failures(&HistoryWindow::new()), 0);
    }
}
