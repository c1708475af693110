//! Redis-backed permission cache store.

use async_trait::async_trait;
use redis::AsyncCommands;
use tenantgate_application::CacheStore;
use tenantgate_core::{AppError, AppResult};

const SCAN_BATCH_SIZE: usize = 200;

/// Redis implementation of the cache store port.
///
/// Entries are plain string keys without a Redis TTL; staleness is judged by
/// the cache from the stored timestamp.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    /// Creates a store with a configured Redis client.
    #[must_use]
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::StoreUnavailable(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut connection = self.connection().await?;
        connection.get(key).await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to read permission cache entry '{key}': {error}"
            ))
        })
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        let mut connection = self.connection().await?;
        connection.set(key, value).await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to write permission cache entry '{key}': {error}"
            ))
        })
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;
        connection.del(key).await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to delete permission cache entry '{key}': {error}"
            ))
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut connection = self.connection().await?;
        let pattern = scan_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut connection)
                .await
                .map_err(|error| {
                    AppError::StoreUnavailable(format!(
                        "failed to scan permission cache keys: {error}"
                    ))
                })?;

            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        // SCAN may report a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Builds a `MATCH` pattern that treats the prefix literally.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for character in prefix.chars() {
        if matches!(character, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(character);
    }
    pattern.push('*');
    pattern
}
