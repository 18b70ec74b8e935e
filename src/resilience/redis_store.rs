//! Redis-backed state store, shared by every bridge instance on the same server.
//!
//! # Design Decisions
//! - One multiplexed `ConnectionManager`, cloned per command; it reconnects on its own
//! - `compare_and_swap` runs as a Lua script so the read and the write are one step

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use crate::resilience::store::{StateStore, StoreError};

/// `KEYS[1]` is the key; `ARGV` is (expected present "1"/"0", expected, new).
const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '0' then
  if current then return 0 end
elseif current ~= ARGV[2] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
";

/// Store over a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_swap: Script,
}

impl RedisStore {
    /// Connect to `url` and confirm the server answers within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let mut connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable(format!("no answer from Redis within {timeout:?}")))?
            .map_err(unavailable)?;

        let _: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut connection))
            .await
            .map_err(|_| StoreError::Unavailable("PING timed out".to_string()))?
            .map_err(unavailable)?;

        Ok(Self {
            connection,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await.map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.set(key, value).await.map_err(unavailable)?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut connection = self.connection.clone();
        let result: Result<i64, RedisError> = connection.incr(key, 1).await;
        match result {
            Ok(next) => Ok(next),
            Err(e) if e.kind() == redis::ErrorKind::ResponseError => {
                let value: Option<String> = connection.get(key).await.map_err(unavailable)?;
                Err(StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: value.unwrap_or_default(),
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(key).await.map_err(unavailable)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let present = if expected.is_some() { "1" } else { "0" };
        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(present)
            .arg(expected.unwrap_or_default())
            .arg(new)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(swapped == 1)
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_unavailable() {
        let err = RedisStore::connect("not a redis url", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let err = RedisStore::connect("redis://127.0.0.1:9/0", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    /// Runs against a real server only when `REDIS_URL` is set.
    #[tokio::test]
    async fn test_primitives_against_live_server() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisStore::connect(&url, Duration::from_secs(2)).await.unwrap();
        let key = format!("lyve_bridge_test:{}", uuid::Uuid::new_v4());

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(!store.compare_and_swap(&key, Some("OPEN"), "HALF_OPEN").await.unwrap());
        assert!(store.compare_and_swap(&key, None, "OPEN").await.unwrap());
        assert!(!store.compare_and_swap(&key, None, "CLOSED").await.unwrap());
        assert!(store.compare_and_swap(&key, Some("OPEN"), "HALF_OPEN").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("HALF_OPEN"));
        assert!(matches!(
            store.increment(&key).await,
            Err(StoreError::NotAnInteger { .. })
        ));

        store.delete(&key).await.unwrap();
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
