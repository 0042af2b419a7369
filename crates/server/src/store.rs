//! Persistence for upstream configs and the global model-mapping table,
//! backed by the KV store under the two well-known keys.

use std::collections::HashMap;
use std::sync::Arc;
use uniway_core::error::ProxyError;
use uniway_core::kv::KvStore;
use uniway_core::model::{GlobalModelMapping, UpstreamConfig, derive_vendor};

const CONFIGS_KEY: &str = "api_configs";
const MAPPINGS_KEY: &str = "model_mappings";

fn kv_err(e: anyhow::Error) -> ProxyError {
    ProxyError::Internal(e.to_string())
}

pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn list_configs(&self) -> Result<Vec<UpstreamConfig>, ProxyError> {
        match self.kv.get(CONFIGS_KEY).await.map_err(kv_err)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_configs(&self, configs: &[UpstreamConfig]) -> Result<(), ProxyError> {
        let bytes = serde_json::to_vec(configs)?;
        self.kv.set(CONFIGS_KEY, bytes, None).await.map_err(kv_err)
    }

    pub async fn create_config(&self, mut config: UpstreamConfig) -> Result<UpstreamConfig, ProxyError> {
        let mut configs = self.list_configs().await?;
        config.id = format!("cfg_{}", chrono::Utc::now().timestamp_millis());
        config.created_at = chrono::Utc::now().to_rfc3339();
        if config.vendor.is_empty() {
            config.vendor = derive_vendor(&config.base_url);
        }
        configs.push(config.clone());
        self.save_configs(&configs).await?;
        Ok(config)
    }

    pub async fn get_config(&self, id: &str) -> Result<UpstreamConfig, ProxyError> {
        self.list_configs()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ProxyError::NotFound(format!("config {id} not found")))
    }

    pub async fn update_config(&self, id: &str, mut update: UpstreamConfig) -> Result<UpstreamConfig, ProxyError> {
        let mut configs = self.list_configs().await?;
        let existing = configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ProxyError::NotFound(format!("config {id} not found")))?;
        update.id = existing.id.clone();
        update.created_at = existing.created_at.clone();
        if update.vendor.is_empty() {
            update.vendor = derive_vendor(&update.base_url);
        }
        *existing = update.clone();
        self.save_configs(&configs).await?;
        Ok(update)
    }

    pub async fn delete_config(&self, id: &str) -> Result<(), ProxyError> {
        let mut configs = self.list_configs().await?;
        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            return Err(ProxyError::NotFound(format!("config {id} not found")));
        }
        self.save_configs(&configs).await
    }

    pub async fn global_mappings(&self) -> Result<GlobalModelMapping, ProxyError> {
        match self.kv.get(MAPPINGS_KEY).await.map_err(kv_err)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(GlobalModelMapping::new()),
        }
    }

    pub async fn upsert_mapping(
        &self,
        unified_name: &str,
        vendor_map: HashMap<String, String>,
    ) -> Result<(), ProxyError> {
        let mut mappings = self.global_mappings().await?;
        mappings.insert(unified_name.to_string(), vendor_map);
        let bytes = serde_json::to_vec(&mappings)?;
        self.kv.set(MAPPINGS_KEY, bytes, None).await.map_err(kv_err)
    }

    pub async fn delete_mapping(&self, unified_name: &str) -> Result<(), ProxyError> {
        let mut mappings = self.global_mappings().await?;
        if mappings.remove(unified_name).is_none() {
            return Err(ProxyError::NotFound(format!("mapping {unified_name} not found")));
        }
        let bytes = serde_json::to_vec(&mappings)?;
        self.kv.set(MAPPINGS_KEY, bytes, None).await.map_err(kv_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniway_core::kv::LocalKv;

    fn config(id: &str) -> UpstreamConfig {
        UpstreamConfig {
            id: id.to_string(),
            api_key: "sk-test-0000".to_string(),
            base_url: "https://api.example.com".to_string(),
            models: vec!["gpt-x".to_string()],
            vendor: String::new(),
            model_mappings: HashMap::new(),
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_derives_vendor() {
        let store = ConfigStore::new(Arc::new(LocalKv::new()));
        let created = store.create_config(config("ignored")).await.unwrap();
        assert!(created.id.starts_with("cfg_"));
        assert_eq!(created.vendor, "api.example.com");
        assert!(!created.created_at.is_empty());
    }

    #[tokio::test]
    async fn update_preserves_id_and_created_at() {
        let store = ConfigStore::new(Arc::new(LocalKv::new()));
        let created = store.create_config(config("ignored")).await.unwrap();
        let mut update = created.clone();
        update.models = vec!["gpt-y".to_string()];
        let updated = store.update_config(&created.id, update).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.models, vec!["gpt-y".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_config_is_not_found() {
        let store = ConfigStore::new(Arc::new(LocalKv::new()));
        let err = store.delete_config("nope").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn mapping_upsert_and_delete_roundtrip() {
        let store = ConfigStore::new(Arc::new(LocalKv::new()));
        let mut vendor_map = HashMap::new();
        vendor_map.insert("openai".to_string(), "gpt-4o".to_string());
        store.upsert_mapping("gpt-4", vendor_map).await.unwrap();
        assert!(store.global_mappings().await.unwrap().contains_key("gpt-4"));
        store.delete_mapping("gpt-4").await.unwrap();
        assert!(!store.global_mappings().await.unwrap().contains_key("gpt-4"));
    }

    #[tokio::test]
    async fn delete_missing_mapping_is_not_found() {
        let store = ConfigStore::new(Arc::new(LocalKv::new()));
        let err = store.delete_mapping("nope").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }
}
