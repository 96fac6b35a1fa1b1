//! Redis-backed recipient cache
//!
//! Guardian lookups happen on every notification fan-out, so the directory
//! is wrapped with a read-through redis cache. Like the database, redis is
//! optional: with no `REDIS_URL` the wrapper is a passthrough.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client as RedisClient};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RedisConfig;
use crate::error::Result;
use crate::store::RecipientDirectory;
use crate::types::Recipient;

/// Open a managed redis connection, degrading to `None` on any failure.
pub async fn connect_redis(config: &RedisConfig) -> Option<ConnectionManager> {
    if config.url.is_empty() {
        return None;
    }

    match RedisClient::open(config.url.as_str()) {
        Ok(client) => match ConnectionManager::new(client).await {
            Ok(manager) => {
                info!("Connected to Redis");
                Some(manager)
            }
            Err(e) => {
                warn!("Failed to connect to Redis: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to create Redis client: {}", e);
            None
        }
    }
}

pub struct CachedRecipientDirectory {
    inner: Arc<dyn RecipientDirectory>,
    redis: Option<ConnectionManager>,
    key_prefix: String,
    ttl_seconds: u64,
}

impl CachedRecipientDirectory {
    pub fn new(
        inner: Arc<dyn RecipientDirectory>,
        redis: Option<ConnectionManager>,
        config: &RedisConfig,
    ) -> Self {
        Self {
            inner,
            redis,
            key_prefix: config.key_prefix.clone(),
            ttl_seconds: config.cache_ttl_seconds,
        }
    }

    fn cache_key(&self, student_id: i64) -> String {
        format!("{}guardians:{}", self.key_prefix, student_id)
    }
}

#[async_trait]
impl RecipientDirectory for CachedRecipientDirectory {
    async fn guardians_of(&self, student_id: i64) -> Result<Vec<Recipient>> {
        let key = self.cache_key(student_id);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            if let Ok(cached) = conn.get::<_, String>(&key).await {
                if let Ok(recipients) = serde_json::from_str::<Vec<Recipient>>(&cached) {
                    return Ok(recipients);
                }
            }
        }

        let recipients = self.inner.guardians_of(student_id).await?;

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            if let Ok(serialized) = serde_json::to_string(&recipients) {
                let result: std::result::Result<(), redis::RedisError> = redis::cmd("SETEX")
                    .arg(&key)
                    .arg(self.ttl_seconds)
                    .arg(serialized)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = result {
                    warn!("Failed to cache guardian lookup: {}", e);
                }
            }
        }

        Ok(recipients)
    }

    async fn add_guardian(&self, student_id: i64, recipient: Recipient) -> Result<()> {
        self.inner.add_guardian(student_id, recipient).await?;

        // Invalidate so the next lookup sees the new guardian.
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: std::result::Result<(), redis::RedisError> = redis::cmd("DEL")
                .arg(self.cache_key(student_id))
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                warn!("Failed to invalidate guardian cache: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Language;

    #[tokio::test]
    async fn test_passthrough_without_redis() {
        let inner = Arc::new(MemoryStore::new());
        inner
            .add_guardian(
                1,
                Recipient {
                    id: 10,
                    display_name: "Mme Ngo".to_string(),
                    email: None,
                    phone_e164: None,
                    whatsapp_opt_in: false,
                    preferred_language: Language::Fr,
                },
            )
            .await
            .unwrap();

        let directory = CachedRecipientDirectory::new(
            inner.clone(),
            None,
            &RedisConfig {
                url: String::new(),
                key_prefix: "test:".to_string(),
                cache_ttl_seconds: 60,
                connection_timeout_seconds: 5,
            },
        );

        let guardians = directory.guardians_of(1).await.unwrap();
        assert_eq!(guardians.len(), 1);

        directory
            .add_guardian(
                1,
                Recipient {
                    id: 11,
                    display_name: "M. Ngo".to_string(),
                    email: None,
                    phone_e164: None,
                    whatsapp_opt_in: false,
                    preferred_language: Language::Fr,
                },
            )
            .await
            .unwrap();
        assert_eq!(directory.guardians_of(1).await.unwrap().len(), 2);
    }

    #[test]
    fn test_cache_key_shape() {
        let directory = CachedRecipientDirectory::new(
            Arc::new(MemoryStore::new()),
            None,
            &RedisConfig {
                url: String::new(),
                key_prefix: "educafric:notify:".to_string(),
                cache_ttl_seconds: 60,
                connection_timeout_seconds: 5,
            },
        );
        assert_eq!(directory.cache_key(42), "educafric:notify:guardians:42");
    }
}
