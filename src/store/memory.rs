use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec;
use crate::error::{Result, SessionError};
use crate::models::value::Data;
use crate::store::{Store, StoreOption};

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// An in-process session store.
///
/// Entries are kept encoded, so a reader always sees a complete snapshot of
/// the last finished `set`. The map is sharded; the sweeper locks one shard at
/// a time.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore` without a sweeper.
    ///
    /// Expired entries are still never returned; they are just not reclaimed
    /// until read.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_entries(&self.entries)
    }

    /// Starts a background task that sweeps expired entries every `interval`.
    ///
    /// The task ends on its own once every clone of the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let entries: Weak<DashMap<String, Entry>> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    tracing::debug!("Memory session store dropped, stopping sweeper");
                    return;
                };
                let removed = sweep_entries(&entries);
                if removed > 0 {
                    tracing::debug!("🧹 Swept {} expired sessions", removed);
                }
            }
        })
    }
}

fn sweep_entries(entries: &DashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str, opt: StoreOption) -> Result<Data> {
        let now = Instant::now();

        match self.entries.get_mut(key) {
            None => return Err(SessionError::NotFound),
            Some(mut entry) => {
                if !entry.is_expired(now) {
                    if let (true, Some(ttl)) = (opt.rolling, opt.ttl) {
                        entry.expires_at = Some(now + ttl);
                    }
                    return codec::decode(&entry.bytes);
                }
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Err(SessionError::NotFound)
    }

    async fn set(&self, key: &str, value: &Data, opt: StoreOption) -> Result<()> {
        let bytes = codec::encode(value)?;
        let expires_at = opt.ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { bytes, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str, _opt: StoreOption) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
