//! Core data model: upstream configuration, the global model-alias table,
//! and per-pair request history.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One configured upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub id: String,
    pub api_key: String,
    pub base_url: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model_mappings: HashMap<String, String>,
    pub created_at: String,
}

impl UpstreamConfig {
    /// The `**<last-4>` masking used by listings; `****` if too short to mask safely.
    pub fn masked_api_key(&self) -> String {
        if self.api_key.len() > 4 {
            format!("**{}", &self.api_key[self.api_key.len() - 4..])
        } else {
            "****".to_string()
        }
    }

    pub fn to_masked_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "api_key": self.masked_api_key(),
            "base_url": self.base_url,
            "models": self.models,
            "vendor": self.vendor,
            "model_mappings": self.model_mappings,
            "created_at": self.created_at,
        })
    }
}

/// Derive a vendor tag from the host portion of a base URL, mirroring what the
/// admin surface does when a config is created without an explicit vendor.
pub fn derive_vendor(base_url: &str) -> String {
    url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| base_url.to_string())
}

/// client-model name -> (vendor -> actual-model name)
pub type GlobalModelMapping = HashMap<String, HashMap<String, String>>;

/// One completed (or attempted) forward to an upstream, used for health
/// accounting and circuit breaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    /// Milliseconds since epoch.
    pub request_time: i64,
    pub request_success: bool,
    /// Milliseconds from dispatch to first accepted byte; -1 if none.
    pub first_token_rt: i64,
    pub is_streaming: bool,
    pub request_type: String,
}

impl RequestRecord {
    pub fn new(request_time_ms: i64, is_streaming: bool, request_type: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            request_time: request_time_ms,
            request_success: false,
            first_token_rt: -1,
            is_streaming,
            request_type: request_type.to_string(),
        }
    }
}

/// Bounded, newest-first history for one (upstream, actual-model) pair.
pub type HistoryWindow = std::collections::VecDeque<RequestRecord>;

pub const HISTORY_MAX_RECORDS: usize = 50;
pub const HISTORY_MAX_AGE_MS: i64 = 72 * 60 * 60 * 1000;
