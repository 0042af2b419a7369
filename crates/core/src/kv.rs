//! Abstract key-value store with two backends: a remote service (Redis) and
//! an in-process map. Both implement the same four-method contract so the
//! rest of the crate never branches on which one is active.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;
    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<Vec<u8>>>>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-wide map guarded by a single lock. TTLs are accepted but not
/// enforced — the history bound (§4.2) keeps per-key size in check, and
/// config keys are never expected to expire.
#[derive(Default)]
pub struct LocalKv {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl LocalKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for LocalKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> anyhow::Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        let data = self.data.read().await;
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

/// Redis-backed store, used when `REDIS_URL` is configured.
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = redis::AsyncCommands::get(&mut conn, key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(d) => {
                let _: () =
                    redis::AsyncCommands::set_ex(&mut conn, key, value, d.as_secs().max(1))
                        .await?;
            }
            None => {
                let _: () = redis::AsyncCommands::set(&mut conn, key, value).await?;
            }
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<Vec<u8>>> = redis::AsyncCommands::mget(&mut conn, keys).await?;
        Ok(values)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::AsyncCommands::del(&mut conn, key).await?;
        Ok(())
    }
}

/// Remote store with a local fallback for transient failures, matching the
/// reference implementation's try-Redis-then-in-memory behavior on write.
pub struct FallbackKv {
    remote: Arc<dyn KvStore>,
    local: Arc<LocalKv>,
}

impl FallbackKv {
    pub fn new(remote: Arc<dyn KvStore>, local: Arc<LocalKv>) -> Self {
        Self { remote, local }
    }
}

#[async_trait]
impl KvStore for FallbackKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.remote.get(key).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(error = %e, "KV get failed, falling back to local store");
                self.local.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        if let Err(e) = self.remote.set(key, value.clone(), ttl).await {
            tracing::warn!(error = %e, "KV set failed, falling back to local store");
            return self.local.set(key, value, ttl).await;
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        match self.remote.mget(keys).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(error = %e, "KV mget failed, falling back to local store");
                self.local.mget(keys).await
            }
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        if let Err(e) = self.remote.delete(key).await {
            tracing::warn!(error = %e, "KV delete failed, falling back to local store");
            return self.local.delete(key).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_kv_roundtrip() {
        let kv = LocalKv::new();
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn local_kv_mget_mixes_present_and_absent() {
        let kv = LocalKv::new();
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        let result = kv
            .mget(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(result, vec![Some(b"1".to_vec()), None]);
    }

    #[tokio::test]
    async fn local_kv_delete_removes_key() {
        let kv = LocalKv::new();
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }
}
