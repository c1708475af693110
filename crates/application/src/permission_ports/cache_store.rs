use async_trait::async_trait;
use tenantgate_core::AppResult;

/// Durable key-value port backing the permission cache.
///
/// Values are opaque JSON documents; the store never interprets them.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads one value.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Writes one value, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> AppResult<()>;

    /// Deletes one value; deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Lists every key starting with the prefix.
    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}
