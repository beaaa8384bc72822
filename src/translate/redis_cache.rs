//! Shared translation cache backed by Redis (or any server speaking the
//! same protocol, e.g. Valkey). Values are the JSON form of
//! `TranslationResponse`, written with `SET key value EX ttl`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::cache::{CacheError, CacheStore, TRANSLATION_TTL};
use super::TranslationResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_RETRIES: usize = 2;

pub struct RedisCache {
    client: redis::Client,
    /// One multiplexed, self-reconnecting connection shared by all requests.
    conn: OnceCell<ConnectionManager>,
    ttl: Duration,
}

impl RedisCache {
    /// Build a client for `url`. A bare `host:port` is accepted and
    /// treated as `redis://host:port`. No connection is made until first use.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let url = normalize_url(url);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| CacheError::Backend(format!("invalid URL: {e}")))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl: TRANSLATION_TTL,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(RESPONSE_TIMEOUT)
                    .set_number_of_retries(RECONNECT_RETRIES);
                ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| CacheError::Backend(format!("connection failed: {e}")))
            })
            .await
            .cloned()
    }

    /// Round-trip a `PING`. Used once at startup.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("PING failed: {e}")))?;
        info!(reply = %pong, "redis cache reachable");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<TranslationResponse>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;

        match raw {
            Some(data) => {
                let value = serde_json::from_str(&data)
                    .map_err(|e| CacheError::Serialization(format!("deserialize: {e}")))?;
                debug!(key, "redis cache hit");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &TranslationResponse) -> Result<(), CacheError> {
        let data = serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(format!("serialize: {e}")))?;
        let mut conn = self.connection().await?;
        let ttl_secs = self.ttl.as_secs();
        let _: () = conn
            .set_ex(key, data, ttl_secs)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))?;
        debug!(key, ttl_secs, "redis cache set");
        Ok(())
    }
}

fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("redis://{url}")
    }
}
