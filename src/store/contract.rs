//! Pluggable persistence for session data.
//!
//! Backends are keyed by the hashed session id and hold one encoded [`Data`]
//! blob per key. Writes are last-writer-wins per key; no cross-key
//! transactions are needed.
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::value::Data;

/// Per-call options handed to a [`Store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOption {
    /// Extend the entry's TTL when it is read.
    pub rolling: bool,
    /// Entry lifetime. `None` means no expiry.
    pub ttl: Option<Duration>,
}

impl StoreOption {
    pub fn new(rolling: bool, ttl: Duration) -> Self {
        Self {
            rolling,
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }
}

/// A session storage backend.
///
/// `get` must fail with [`SessionError::NotFound`](crate::error::SessionError::NotFound)
/// for absent or expired keys and must never expose a value whose `set` has
/// not completed. `del` of an absent key succeeds.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Loads the data stored under `key`, extending its TTL if `opt.rolling`.
    async fn get(&self, key: &str, opt: StoreOption) -> Result<Data>;

    /// Replaces the data stored under `key` and resets its TTL.
    async fn set(&self, key: &str, value: &Data, opt: StoreOption) -> Result<()>;

    /// Removes `key`.
    async fn del(&self, key: &str, opt: StoreOption) -> Result<()>;
}
