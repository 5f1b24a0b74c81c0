use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::codec;
use crate::error::{Result, SessionError};
use crate::models::value::Data;
use crate::store::{Store, StoreOption};

/// A session store backed by Redis.
///
/// Every session is a plain Redis key holding the encoded data, with the
/// store TTL applied as the key's expiry so Redis reclaims entries itself.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"<ConnectionManager>")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisStore {
    /// Creates a new `RedisStore`.
    ///
    /// # Arguments
    ///
    /// * `connection` - A pooled Redis connection.
    /// * `prefix` - Prepended to every key, e.g. `session:`.
    pub fn new(connection: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
        }
    }

    /// Connects to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");
        Ok(Self::new(connection, prefix))
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn ttl_secs(opt: &StoreOption) -> Option<u64> {
    opt.ttl.map(|ttl| ttl.as_secs().max(1))
}

#[async_trait]
impl Store for RedisStore {
    #[tracing::instrument(name = "Load session from Redis", level = "debug", skip_all)]
    async fn get(&self, key: &str, opt: StoreOption) -> Result<Data> {
        let k = self.redis_key(key);
        let mut conn = self.connection.clone();

        let bytes: Option<Vec<u8>> = match (opt.rolling, ttl_secs(&opt)) {
            (true, Some(secs)) => {
                let (bytes,): (Option<Vec<u8>>,) = redis::pipe()
                    .get(&k)
                    .expire(&k, secs as i64)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                bytes
            }
            _ => conn.get(&k).await?,
        };

        match bytes {
            Some(bytes) => codec::decode(&bytes),
            None => Err(SessionError::NotFound),
        }
    }

    #[tracing::instrument(name = "Save session to Redis", level = "debug", skip_all)]
    async fn set(&self, key: &str, value: &Data, opt: StoreOption) -> Result<()> {
        let bytes = codec::encode(value)?;
        let k = self.redis_key(key);
        let mut conn = self.connection.clone();

        match ttl_secs(&opt) {
            Some(secs) => {
                let _: () = conn.set_ex(k, bytes, secs).await.map_err(|e| {
                    tracing::error!("❌ Redis set_ex failed: {}", e);
                    SessionError::Redis(e)
                })?;
            }
            None => {
                let _: () = conn.set(k, bytes).await.map_err(|e| {
                    tracing::error!("❌ Redis set failed: {}", e);
                    SessionError::Redis(e)
                })?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(name = "Delete session from Redis", level = "debug", skip_all)]
    async fn del(&self, key: &str, _opt: StoreOption) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: u64 = conn.del(self.redis_key(key)).await?;
        Ok(())
    }
}
