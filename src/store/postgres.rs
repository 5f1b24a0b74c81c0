use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::{Result, SessionError};
use crate::models::value::Data;
use crate::store::{Store, StoreOption};

/// A session store backed by a PostgreSQL table.
///
/// Layout: `k text primary key, v bytea, e timestamptz` with an index on `e`.
/// Expired rows are filtered out on read and reclaimed by a janitor task.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
    table: String,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"<Pool>")
            .field("table", &self.table)
            .finish()
    }
}

fn valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit())
}

fn expiry(ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
    ttl.map(|ttl| {
        chrono::Duration::from_std(ttl)
            .map(|ttl| Utc::now() + ttl)
            .map_err(|e| SessionError::StoreUnavailable(format!("invalid session TTL: {}", e)))
    })
    .transpose()
}

impl PostgresStore {
    /// Creates a new `PostgresStore` over `table`.
    ///
    /// The table name is interpolated into SQL, so only `[A-Za-z0-9_]` is
    /// accepted.
    pub fn new(pool: Pool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !valid_table_name(&table) {
            return Err(SessionError::StoreUnavailable(format!(
                "invalid session table name: {:?}",
                table
            )));
        }
        Ok(Self { pool, table })
    }

    /// Creates the session table and its expiry index if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    k TEXT PRIMARY KEY,
                    v BYTEA NOT NULL,
                    e TIMESTAMPTZ
                );
                CREATE INDEX IF NOT EXISTS {table}_e_idx ON {table} (e);
                "#,
                table = self.table
            ))
            .await?;
        tracing::info!("✅ Session table {} ready", self.table);
        Ok(())
    }

    /// Deletes every expired row. Returns how many were removed.
    pub async fn sweep(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!("DELETE FROM {} WHERE e <= now()", self.table))
            .await?;
        Ok(client.execute(&stmt, &[]).await?)
    }

    /// Starts a background task that runs [`sweep`](Self::sweep) every `interval`.
    pub fn spawn_janitor(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.sweep().await {
                    Ok(removed) => {
                        tracing::debug!("🧹 Swept {} expired sessions", removed);
                    }
                    Err(e) => {
                        tracing::error!("❌ Session sweep failed: {}", e);
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[tracing::instrument(name = "Load session from PostgreSQL", level = "debug", skip_all)]
    async fn get(&self, key: &str, opt: StoreOption) -> Result<Data> {
        let client = self.pool.get().await?;

        let row = match (opt.rolling, expiry(opt.ttl)?) {
            (true, Some(expires_at)) => {
                let stmt = client
                    .prepare_cached(&format!(
                        "UPDATE {} SET e = $2 WHERE k = $1 AND (e IS NULL OR e > now()) RETURNING v",
                        self.table
                    ))
                    .await?;
                client.query_opt(&stmt, &[&key, &expires_at]).await?
            }
            _ => {
                let stmt = client
                    .prepare_cached(&format!(
                        "SELECT v FROM {} WHERE k = $1 AND (e IS NULL OR e > now())",
                        self.table
                    ))
                    .await?;
                client.query_opt(&stmt, &[&key]).await?
            }
        };

        let row = row.ok_or(SessionError::NotFound)?;
        let bytes: Vec<u8> = row.try_get("v")?;
        codec::decode(&bytes)
    }

    #[tracing::instrument(name = "Save session to PostgreSQL", level = "debug", skip_all)]
    async fn set(&self, key: &str, value: &Data, opt: StoreOption) -> Result<()> {
        let bytes = codec::encode(value)?;
        let expires_at = expiry(opt.ttl)?;

        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!(
                r#"
                INSERT INTO {} (k, v, e)
                VALUES ($1, $2, $3)
                ON CONFLICT (k)
                DO UPDATE SET v = excluded.v, e = excluded.e
                "#,
                self.table
            ))
            .await?;
        client.execute(&stmt, &[&key, &bytes, &expires_at]).await?;
        Ok(())
    }

    #[tracing::instrument(name = "Delete session from PostgreSQL", level = "debug", skip_all)]
    async fn del(&self, key: &str, _opt: StoreOption) -> Result<()> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!("DELETE FROM {} WHERE k = $1", self.table))
            .await?;
        client.execute(&stmt, &[&key]).await?;
        Ok(())
    }
}
