use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::manager::Manager;
use crate::store::{MemoryStore, PostgresStore, RedisStore, Store};

/// How often the memory store drops expired sessions.
pub const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// How often the PostgreSQL store deletes expired rows.
pub const POSTGRES_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 3600);
/// Connections kept by the PostgreSQL store's pool.
pub const POSTGRES_POOL_SIZE: usize = 16;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The session manager.
    pub manager: Manager,
    /// Name of the session cookie used by the handlers.
    pub session_name: String,
}

impl AppState {
    /// Creates a new `AppState` from an existing manager.
    pub fn with_manager(manager: Manager, session_name: impl Into<String>) -> Self {
        Self {
            manager,
            session_name: session_name.into(),
        }
    }

    /// Creates a new `AppState`, connecting the configured store backend and
    /// starting its background sweeper.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn Store> = match &config.store {
            StoreBackend::Memory => {
                let store = MemoryStore::new();
                store.spawn_sweeper(MEMORY_SWEEP_INTERVAL);
                tracing::info!("✅ Memory session store initialized");
                Arc::new(store)
            }
            StoreBackend::Redis(url) => {
                let store = RedisStore::connect(url, config.redis_prefix.clone()).await?;
                tracing::info!("✅ Redis session store initialized");
                Arc::new(store)
            }
            StoreBackend::Postgres(url) => {
                let pool = crate::db::create_pool(
                    url,
                    POSTGRES_POOL_SIZE,
                    config.session.store_timeout,
                )?;
                let store = PostgresStore::new(pool, config.session_table.clone())?;
                store.migrate().await?;
                store.spawn_janitor(POSTGRES_SWEEP_INTERVAL);
                tracing::info!("✅ PostgreSQL session store initialized");
                Arc::new(store)
            }
        };

        let manager = Manager::with_store(config.session.clone(), store);
        tracing::info!("✅ Session manager initialized: {:?}", manager);

        Ok(Self::with_manager(manager, config.session_name.clone()))
    }
}
