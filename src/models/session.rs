use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use tower_cookies::cookie::SameSite;

use crate::error::Result;
use crate::manager::Manager;
use crate::models::flash::Flash;
use crate::models::value::{Data, Value};

/// Reserved key: unix seconds of the last store write. Zero on a rotated-away
/// entry.
pub const TIMESTAMP_KEY: &str = "_session/ts";
/// Reserved key: unix nanoseconds at which the id was rotated away.
pub const DESTROYED_KEY: &str = "_session/destroyed";
/// Reserved key: the encoded flash bag.
pub const FLASH_KEY: &str = "_session/flash";

/// Cookie attributes of one session, resolved for the current request.
#[derive(Debug, Clone)]
pub struct CookieAttributes {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub http_only: bool,
    pub max_age: Duration,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub rolling: bool,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    /// Store key. Hash of `raw_id` unless hashing is disabled.
    pub(crate) id: String,
    /// Cookie value before signing. Never written to the store.
    pub(crate) raw_id: String,
    pub(crate) data: Data,
    pub(crate) flash: Option<Flash>,
    pub(crate) changed: bool,
    pub(crate) is_new: bool,
    pub(crate) regenerated: bool,
    pub(crate) destroyed: bool,
    pub(crate) hijack_grace: Duration,
    pub(crate) cookie: CookieAttributes,
}

impl SessionState {
    pub(crate) fn changed(&self) -> bool {
        self.changed || self.flash.as_ref().is_some_and(Flash::changed)
    }

    fn set(&mut self, key: String, value: Value) {
        self.changed = true;
        self.data.insert(key, value);
    }

    fn pop(&mut self, key: &str) -> Option<Value> {
        let value = self.data.remove(key);
        if value.is_some() {
            self.changed = true;
        }
        value
    }

    pub(crate) fn flash_mut(&mut self) -> &mut Flash {
        if self.flash.is_none() {
            let flash = match self.data.get(FLASH_KEY) {
                Some(Value::Bytes(bytes)) => Flash::decode(bytes).unwrap_or_else(|e| {
                    tracing::warn!("Discarding undecodable flash data: {}", e);
                    Flash::default()
                }),
                _ => Flash::default(),
            };
            self.flash = Some(flash);
        }
        self.flash.get_or_insert_with(Flash::default)
    }

    /// Folds a changed flash bag back into `data`.
    pub(crate) fn sync_flash(&mut self) -> Result<()> {
        let Some(flash) = self.flash.as_ref() else {
            return Ok(());
        };
        if !flash.changed() {
            return Ok(());
        }
        if flash.is_empty() {
            self.data.remove(FLASH_KEY);
        } else {
            let bytes = flash.encode()?;
            self.data.insert(FLASH_KEY.to_string(), Value::Bytes(bytes));
        }
        self.changed = true;
        Ok(())
    }
}

/// A per-request handle to one session.
///
/// Clones share state: every handle obtained for the same session name within
/// one request observes the same data. Accessors never fail; a missing key or
/// a value of another type reads as the type's zero value.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    manager: Manager,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("name", &state.cookie.name)
            .field("is_new", &state.is_new)
            .field("changed", &state.changed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(state: SessionState, manager: Manager) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            manager,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Returns `true` if both handles point at the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// The store key for this session. Safe to log; never the cookie value.
    pub fn id(&self) -> String {
        self.state().id.clone()
    }

    /// The cookie name this session is bound to.
    pub fn name(&self) -> String {
        self.state().cookie.name.clone()
    }

    /// Whether the id was minted during this request.
    pub fn is_new(&self) -> bool {
        self.state().is_new
    }

    /// Whether the session or its flash bag was mutated since it was loaded.
    pub fn changed(&self) -> bool {
        self.state().changed()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state().data.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.state().data.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.state()
            .data
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.state().data.get(key).and_then(Value::as_int).unwrap_or_default()
    }

    pub fn get_float(&self, key: &str) -> f64 {
        self.state().data.get(key).and_then(Value::as_float).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.state().data.get(key).and_then(Value::as_bool).unwrap_or_default()
    }

    pub fn get_bytes(&self, key: &str) -> Vec<u8> {
        self.state()
            .data
            .get(key)
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state().set(key.into(), value.into());
    }

    /// Removes `key`. Only marks the session changed if the key existed.
    pub fn del(&self, key: &str) {
        self.state().pop(key);
    }

    /// Removes `key` and returns its value.
    pub fn pop(&self, key: &str) -> Option<Value> {
        self.state().pop(key)
    }

    pub fn pop_string(&self, key: &str) -> String {
        self.pop(key).map(Value::into_string).unwrap_or_default()
    }

    pub fn pop_int(&self, key: &str) -> i64 {
        self.pop(key).and_then(|v| v.as_int()).unwrap_or_default()
    }

    pub fn pop_float(&self, key: &str) -> f64 {
        self.pop(key).and_then(|v| v.as_float()).unwrap_or_default()
    }

    pub fn pop_bool(&self, key: &str) -> bool {
        self.pop(key).and_then(|v| v.as_bool()).unwrap_or_default()
    }

    /// The session's flash bag, decoded on first access.
    pub fn flash(&self) -> SessionFlash {
        SessionFlash {
            state: self.state.clone(),
        }
    }

    /// Whether this id was rotated away longer ago than the hijack grace
    /// window and is still being presented.
    pub fn hijacked(&self) -> bool {
        let state = self.state();
        let Some(destroyed_at) = state.data.get(DESTROYED_KEY).and_then(Value::as_int) else {
            return false;
        };
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let grace = i64::try_from(state.hijack_grace.as_nanos()).unwrap_or(i64::MAX);
        destroyed_at < now.saturating_sub(grace)
    }

    pub fn cookie(&self) -> CookieAttributes {
        self.state().cookie.clone()
    }

    pub fn max_age(&self) -> Duration {
        self.state().cookie.max_age
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.state().cookie.max_age = max_age;
    }

    pub fn rolling(&self) -> bool {
        self.state().cookie.rolling
    }

    pub fn set_rolling(&self, rolling: bool) {
        self.state().cookie.rolling = rolling;
    }

    /// Whether the cookie will carry the `Secure` attribute.
    pub fn secure(&self) -> bool {
        self.state().cookie.secure
    }

    /// Issues a new id for this session, keeping its data.
    ///
    /// Call when the privilege level changes. See [`Manager::regenerate`].
    pub async fn regenerate(&self) -> Result<()> {
        self.manager.regenerate(self).await
    }

    /// Clears all data and issues a new id. See [`Manager::renew`].
    pub async fn renew(&self) -> Result<()> {
        self.manager.renew(self).await
    }

    /// Deletes the session from the store and expires its cookie.
    pub async fn destroy(&self) -> Result<()> {
        self.manager.destroy(self).await
    }
}

/// Flash bag of a [`Session`].
///
/// Each call locks the session only for its own duration, so arguments may
/// read from the same session.
#[derive(Clone)]
pub struct SessionFlash {
    state: Arc<Mutex<SessionState>>,
}

impl SessionFlash {
    fn with<T>(&self, f: impl FnOnce(&mut Flash) -> T) -> T {
        f(self.state.lock().flash_mut())
    }

    /// Replaces every value for `key` with `value`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with(|flash| flash.set(key, value))
    }

    /// Appends `value` to the values for `key`.
    pub fn add(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with(|flash| flash.add(key, value))
    }

    /// Removes and returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.with(|flash| flash.get(key))
    }

    pub fn get_string(&self, key: &str) -> String {
        self.with(|flash| flash.get_string(key))
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.with(|flash| flash.get_int(key))
    }

    pub fn get_float(&self, key: &str) -> f64 {
        self.with(|flash| flash.get_float(key))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.with(|flash| flash.get_bool(key))
    }

    /// Removes and returns every value for `key`.
    pub fn values(&self, key: &str) -> Vec<Value> {
        self.with(|flash| flash.values(key))
    }

    pub fn del(&self, key: &str) {
        self.with(|flash| flash.del(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.with(|flash| flash.has(key))
    }

    pub fn clear(&self) {
        self.with(Flash::clear)
    }

    pub fn count(&self) -> usize {
        self.with(|flash| flash.count())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|flash| flash.is_empty())
    }

    pub fn changed(&self) -> bool {
        self.with(|flash| flash.changed())
    }
}
