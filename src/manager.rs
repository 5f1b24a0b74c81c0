use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use http::header::{COOKIE, SET_COOKIE};
use http::uri::Scheme;
use http::{HeaderMap, HeaderValue, Request};
use tower_cookies::Cookie;
use tower_cookies::cookie::time::{Duration as CookieDuration, OffsetDateTime};

use crate::config::{SecureMode, SessionConfig};
use crate::crypto::{id, signing};
use crate::error::{Result, SessionError};
use crate::models::session::{
    CookieAttributes, DESTROYED_KEY, Session, SessionState, TIMESTAMP_KEY,
};
use crate::models::value::{Data, Value};
use crate::store::{Store, StoreOption};

/// Request extension marking a connection that arrived over TLS.
///
/// A TLS acceptor inserts it so `PreferSecure` can tell HTTPS apart from
/// plain HTTP.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tls;

type IdGenerator = dyn Fn() -> String + Send + Sync;

struct ManagerInner {
    config: SessionConfig,
    store: Arc<dyn Store>,
    generate_id: Arc<IdGenerator>,
}

/// Issues, loads, persists, rotates and destroys sessions.
///
/// Cheap to clone; all clones share one configuration and store.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Creates a new `Manager` over `store`.
    pub fn new(config: SessionConfig, store: impl Store) -> Self {
        Self::with_store(config, Arc::new(store))
    }

    /// Creates a new `Manager` over an already shared store.
    pub fn with_store(config: SessionConfig, store: Arc<dyn Store>) -> Self {
        if config.secret.is_empty() && !config.disable_hash_id {
            tracing::warn!("⚠️  Session secret is empty; store keys are an unsalted HMAC of the id");
        }
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                generate_id: Arc::new(id::generate_session_id),
            }),
        }
    }

    /// Replaces the raw id generator.
    ///
    /// Generated ids must not contain `.` when signing keys are configured.
    pub fn with_id_generator<F>(self, generate_id: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ManagerInner {
                config: self.inner.config.clone(),
                store: self.inner.store.clone(),
                generate_id: Arc::new(generate_id),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn hash_id(&self, raw_id: &str) -> String {
        if self.inner.config.disable_hash_id {
            raw_id.to_string()
        } else {
            id::hash_session_id(raw_id, &self.inner.config.secret)
        }
    }

    fn store_option(&self, rolling: bool) -> StoreOption {
        StoreOption::new(rolling, self.inner.config.store_ttl())
    }

    /// Runs a store call under the configured deadline.
    async fn timed<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.inner.config.store_timeout;
        if limit.is_zero() {
            return call.await;
        }
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::StoreUnavailable(format!(
                "store {} timed out after {:?}",
                op, limit
            ))),
        }
    }

    /// Resolves the `Secure` cookie attribute for `req`.
    pub fn is_secure<B>(&self, req: &Request<B>) -> bool {
        match self.inner.config.secure {
            SecureMode::ForceSecure => true,
            SecureMode::NoSecure => false,
            SecureMode::PreferSecure => {
                if req.uri().scheme() == Some(&Scheme::HTTPS)
                    || req.extensions().get::<Tls>().is_some()
                {
                    return true;
                }
                self.inner.config.proxy
                    && req
                        .headers()
                        .get("x-forwarded-proto")
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
            }
        }
    }

    /// Stored data is treated as absent once it sat untouched past the idle
    /// timeout. Rolling sessions rely on the store TTL instead, and
    /// rotated-away entries (timestamp zero) are kept for hijack detection.
    fn idle_expired(&self, data: &Data, rolling: bool) -> bool {
        let idle = self.inner.config.store_ttl();
        if rolling || idle.is_zero() {
            return false;
        }
        match data.get(TIMESTAMP_KEY).and_then(Value::as_int) {
            Some(saved_at) if saved_at > 0 => {
                let idle_secs = i64::try_from(idle.as_secs()).unwrap_or(i64::MAX);
                Utc::now().timestamp().saturating_sub(saved_at) > idle_secs
            }
            _ => false,
        }
    }

    /// Loads the session named `name` from the request's cookies.
    ///
    /// A missing cookie, a bad signature, a store miss or an idle-expired
    /// entry all yield a fresh session with a newly minted id; the id
    /// presented by the client is never adopted. Only store failures are
    /// returned as errors.
    pub async fn get(&self, headers: &HeaderMap, secure: bool, name: &str) -> Result<Session> {
        let config = &self.inner.config;
        let mut state = SessionState {
            id: String::new(),
            raw_id: String::new(),
            data: Data::new(),
            flash: None,
            changed: false,
            is_new: false,
            regenerated: false,
            destroyed: false,
            hijack_grace: config.hijack_grace,
            cookie: CookieAttributes {
                name: name.to_string(),
                domain: config.domain.clone(),
                path: config.path.clone(),
                http_only: config.http_only,
                max_age: config.max_age,
                secure,
                same_site: config.same_site,
                rolling: config.rolling,
            },
        };

        if let Some(value) = cookie_value(headers, name) {
            match signing::decode_cookie_value(&value, &config.keys) {
                Ok(raw_id) => {
                    let hashed_id = self.hash_id(raw_id);
                    let opt = self.store_option(state.cookie.rolling);
                    match self.timed("get", self.inner.store.get(&hashed_id, opt)).await {
                        Ok(data) if self.idle_expired(&data, state.cookie.rolling) => {
                            tracing::debug!("Session {} idle past its timeout", hashed_id);
                        }
                        Ok(data) => {
                            state.id = hashed_id;
                            state.raw_id = raw_id.to_string();
                            state.data = data;
                        }
                        Err(SessionError::NotFound) => {
                            tracing::debug!("No stored session for cookie {}", name);
                        }
                        Err(SessionError::Codec(e)) => {
                            tracing::warn!("Discarding undecodable session {}: {}", hashed_id, e);
                        }
                        Err(e) => {
                            tracing::error!("❌ Session store lookup failed: {}", e);
                            return Err(e);
                        }
                    }
                }
                Err(_) => {
                    tracing::warn!(cookie = name, "Session cookie signature mismatch, issuing a new session");
                }
            }
        }

        if state.id.is_empty() {
            state.raw_id = (self.inner.generate_id)();
            state.id = self.hash_id(&state.raw_id);
            state.is_new = true;
        }

        Ok(Session::new(state, self.clone()))
    }

    /// Persists `session` and appends its `Set-Cookie` header to `headers`.
    ///
    /// Must run before the response headers are sent. Untouched sessions are
    /// not written unless `resave` is set, and a new untouched session gets
    /// no cookie at all.
    pub async fn save(&self, headers: &mut HeaderMap, session: &Session) -> Result<()> {
        let (id, write, cookie, opt) = {
            let mut state = session.state();

            if state.destroyed {
                let cookie = removal_cookie(&state.cookie);
                drop(state);
                return append_cookie(headers, &cookie);
            }

            state.sync_flash()?;
            let changed = state.changed();
            let emit_cookie = changed || (state.cookie.rolling && !state.is_new);
            let write = self.inner.config.resave || changed;

            if write {
                state
                    .data
                    .insert(TIMESTAMP_KEY.to_string(), Value::Int(Utc::now().timestamp()));
            }

            let cookie = emit_cookie.then(|| {
                let value = signing::encode_cookie_value(&state.raw_id, &self.inner.config.keys);
                session_cookie(&state.cookie, value)
            });

            (
                state.id.clone(),
                write.then(|| state.data.clone()),
                cookie,
                self.store_option(state.cookie.rolling),
            )
        };

        if let Some(data) = write {
            self.timed("set", self.inner.store.set(&id, &data, opt)).await?;
            tracing::debug!("Session {} saved", id);
        }

        if let Some(cookie) = cookie {
            append_cookie(headers, &cookie)?;
        }

        Ok(())
    }

    /// Issues a new id for `session`, keeping its data.
    ///
    /// With `delete_old_session` the old entry is deleted. Otherwise it is
    /// overwritten with a zero timestamp and a destroyed-at marker, so a later
    /// request presenting the old cookie can be recognised through
    /// [`Session::hijacked`]. A second call within the same request does
    /// nothing.
    pub async fn regenerate(&self, session: &Session) -> Result<()> {
        let (old_id, old_data, opt) = {
            let mut state = session.state();
            if state.regenerated {
                tracing::debug!("Session {} already regenerated in this request", state.id);
                return Ok(());
            }

            let was_new = state.is_new;
            let new_raw_id = (self.inner.generate_id)();
            let new_id = self.hash_id(&new_raw_id);

            let old_id = std::mem::replace(&mut state.id, new_id);
            state.raw_id = new_raw_id;
            state.is_new = true;
            state.changed = true;
            state.regenerated = true;

            let old_data = (!was_new).then(|| state.data.clone());
            state.data.remove(DESTROYED_KEY);

            (old_id, old_data, self.store_option(state.cookie.rolling))
        };

        // A freshly minted id was never stored, so there is nothing to retire.
        let Some(mut old_data) = old_data else {
            return Ok(());
        };

        if self.inner.config.delete_old_session {
            self.timed("del", self.inner.store.del(&old_id, opt)).await?;
        } else {
            let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
            old_data.insert(TIMESTAMP_KEY.to_string(), Value::Int(0));
            old_data.insert(DESTROYED_KEY.to_string(), Value::Int(now));
            self.timed("set", self.inner.store.set(&old_id, &old_data, opt))
                .await?;
        }

        tracing::debug!("Session {} rotated", old_id);
        Ok(())
    }

    /// Clears all data and issues a new id.
    ///
    /// Use when escalating privilege so nothing from the anonymous session
    /// survives into the authenticated one.
    pub async fn renew(&self, session: &Session) -> Result<()> {
        {
            let mut state = session.state();
            state.data.clear();
            state.flash = None;
            state.changed = true;
        }
        self.regenerate(session).await
    }

    /// Deletes `session` from the store and makes the next save expire its
    /// cookie.
    pub async fn destroy(&self, session: &Session) -> Result<()> {
        let (id, stored, opt) = {
            let mut state = session.state();
            state.destroyed = true;
            (
                state.id.clone(),
                !state.is_new,
                self.store_option(state.cookie.rolling),
            )
        };

        if stored {
            self.timed("del", self.inner.store.del(&id, opt)).await?;
        }
        tracing::debug!("Session {} destroyed", id);
        Ok(())
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn base_cookie(attrs: &CookieAttributes, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(attrs.name.clone(), value);
    if let Some(domain) = &attrs.domain {
        cookie.set_domain(domain.clone());
    }
    cookie.set_path(attrs.path.clone());
    cookie.set_http_only(attrs.http_only);
    cookie.set_secure(attrs.secure);
    if let Some(same_site) = attrs.same_site {
        cookie.set_same_site(same_site);
    }
    cookie
}

fn session_cookie(attrs: &CookieAttributes, value: String) -> Cookie<'static> {
    let mut cookie = base_cookie(attrs, value);
    if !attrs.max_age.is_zero() {
        let max_age = CookieDuration::seconds(i64::try_from(attrs.max_age.as_secs()).unwrap_or(i64::MAX));
        cookie.set_max_age(max_age);
        cookie.set_expires(OffsetDateTime::now_utc() + max_age);
    }
    cookie
}

fn removal_cookie(attrs: &CookieAttributes) -> Cookie<'static> {
    let mut cookie = base_cookie(attrs, String::new());
    cookie.make_removal();
    cookie
}

fn append_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> Result<()> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| SessionError::Codec(format!("invalid Set-Cookie header: {}", e)))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use zeroize::Zeroizing;

    /// Wraps a memory store and records which keys were touched.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        gets: parking_lot::Mutex<Vec<String>>,
        sets: AtomicUsize,
    }

    #[async_trait]
    impl Store for Arc<RecordingStore> {
        async fn get(&self, key: &str, opt: StoreOption) -> Result<Data> {
            self.gets.lock().push(key.to_string());
            self.inner.get(key, opt).await
        }

        async fn set(&self, key: &str, value: &Data, opt: StoreOption) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value, opt).await
        }

        async fn del(&self, key: &str, opt: StoreOption) -> Result<()> {
            self.inner.del(key, opt).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn get(&self, _key: &str, _opt: StoreOption) -> Result<Data> {
            Err(SessionError::StoreUnavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: &Data, _opt: StoreOption) -> Result<()> {
            Err(SessionError::StoreUnavailable("connection refused".into()))
        }

        async fn del(&self, _key: &str, _opt: StoreOption) -> Result<()> {
            Err(SessionError::StoreUnavailable("connection refused".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl Store for SlowStore {
        async fn get(&self, _key: &str, _opt: StoreOption) -> Result<Data> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(SessionError::NotFound)
        }

        async fn set(&self, _key: &str, _value: &Data, _opt: StoreOption) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn del(&self, _key: &str, _opt: StoreOption) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            secret: Zeroizing::new(b"test-secret".to_vec()),
            keys: vec![Zeroizing::new(b"k1".to_vec())],
            ..Default::default()
        }
    }

    fn recording_manager(config: SessionConfig) -> (Manager, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        (Manager::new(config, store.clone()), store)
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| Cookie::parse(v.to_str().unwrap().to_string()).unwrap())
            .collect()
    }

    fn request_with(cookie: &Cookie<'_>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}={}", cookie.name(), cookie.value())).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn new_session_round_trips_through_cookie() {
        let (manager, _) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        assert!(session.is_new());
        session.set("count", 1);

        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "sess");
        assert!(cookies[0].value().contains('.'));
        assert_eq!(cookies[0].http_only(), Some(true));

        let loaded = manager.get(&request_with(&cookies[0]), false, "sess").await.unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.get_int("count"), 1);
    }

    #[tokio::test]
    async fn store_key_is_never_the_cookie_value() {
        let (manager, store) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        let raw_id = cookie.value().split('.').next().unwrap().to_string();
        let gets = store.gets.lock().clone();
        assert_eq!(gets, vec![session.id()]);
        assert_ne!(gets[0], raw_id);
    }

    #[tokio::test]
    async fn untouched_sessions_are_not_written() {
        let (manager, store) = recording_manager(config());

        let fresh = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        let mut response = HeaderMap::new();
        manager.save(&mut response, &fresh).await.unwrap();
        assert!(response.get(SET_COOKIE).is_none());
        assert_eq!(store.sets.load(Ordering::SeqCst), 0);

        fresh.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &fresh).await.unwrap();
        let cookie = set_cookies(&response).remove(0);
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);

        let loaded = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        let _ = loaded.get("k");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &loaded).await.unwrap();
        assert!(response.get(SET_COOKIE).is_none());
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resave_writes_untouched_sessions() {
        let (manager, store) = recording_manager(SessionConfig {
            resave: true,
            ..config()
        });

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
        assert!(response.get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn rolling_sessions_reissue_the_cookie() {
        let (manager, _) = recording_manager(SessionConfig {
            rolling: true,
            max_age: Duration::from_secs(3600),
            ..config()
        });

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(3600)));

        let loaded = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        let mut response = HeaderMap::new();
        manager.save(&mut response, &loaded).await.unwrap();
        assert_eq!(set_cookies(&response).len(), 1);
    }

    #[tokio::test]
    async fn tampered_cookie_gets_a_fresh_session() {
        let (manager, store) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        let mut value = cookie.value().to_string();
        let last = value.pop().unwrap();
        value.push(if last == 'A' { 'B' } else { 'A' });
        let tampered = Cookie::new("sess", value);

        let loaded = manager.get(&request_with(&tampered), false, "sess").await.unwrap();
        assert!(loaded.is_new());
        assert_ne!(loaded.id(), session.id());
        assert!(loaded.get("k").is_none());
        assert!(store.gets.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_adopted() {
        let (manager, _) = recording_manager(config());
        let forged_raw = "attacker-chosen-id";
        let forged = Cookie::new(
            "sess",
            signing::encode_cookie_value(forged_raw, &manager.config().keys),
        );

        let session = manager.get(&request_with(&forged), false, "sess").await.unwrap();
        assert!(session.is_new());
        assert_ne!(session.id(), manager.hash_id(forged_raw));

        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let issued = set_cookies(&response).remove(0);
        assert!(!issued.value().starts_with(forged_raw));
    }

    #[tokio::test]
    async fn verification_accepts_any_configured_key() {
        let store = Arc::new(RecordingStore::default());
        let old = Manager::new(
            SessionConfig {
                keys: vec![Zeroizing::new(b"k2".to_vec())],
                ..config()
            },
            store.clone(),
        );
        let rotated = Manager::new(
            SessionConfig {
                keys: vec![Zeroizing::new(b"k2".to_vec()), Zeroizing::new(b"k1".to_vec())],
                ..config()
            },
            store.clone(),
        );

        let session = old.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        old.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        let loaded = rotated.get(&request_with(&cookie), false, "sess").await.unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.get_string("k"), "v");
    }

    #[tokio::test]
    async fn regenerate_retires_the_old_id() {
        let (manager, _) = recording_manager(SessionConfig {
            hijack_grace: Duration::ZERO,
            ..config()
        });

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("user", "alice");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let old_cookie = set_cookies(&response).remove(0);

        let loaded = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        let old_id = loaded.id();
        loaded.regenerate().await.unwrap();
        let rotated_id = loaded.id();
        loaded.regenerate().await.unwrap();
        assert_eq!(loaded.id(), rotated_id);
        assert_ne!(rotated_id, old_id);
        assert!(loaded.is_new());

        let mut response = HeaderMap::new();
        manager.save(&mut response, &loaded).await.unwrap();
        let new_cookie = set_cookies(&response).remove(0);
        assert_ne!(new_cookie.value(), old_cookie.value());

        let current = manager.get(&request_with(&new_cookie), false, "sess").await.unwrap();
        assert_eq!(current.get_string("user"), "alice");
        assert!(!current.hijacked());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let replayed = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        assert_eq!(replayed.id(), old_id);
        assert!(replayed.hijacked());
    }

    #[tokio::test]
    async fn hijack_needs_the_grace_window_to_pass() {
        let (manager, _) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("user", "alice");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let old_cookie = set_cookies(&response).remove(0);

        let loaded = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        loaded.regenerate().await.unwrap();

        let replayed = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        assert!(!replayed.hijacked());
    }

    #[tokio::test]
    async fn regenerate_can_delete_the_old_entry() {
        let (manager, _) = recording_manager(SessionConfig {
            delete_old_session: true,
            ..config()
        });

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("user", "alice");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let old_cookie = set_cookies(&response).remove(0);

        let loaded = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        loaded.regenerate().await.unwrap();

        let replayed = manager.get(&request_with(&old_cookie), false, "sess").await.unwrap();
        assert!(replayed.is_new());
        assert!(replayed.get("user").is_none());
    }

    #[tokio::test]
    async fn renew_drops_all_data() {
        let (manager, _) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("cart", "3 items");
        session.flash().add("notice", "hello");
        let old_id = session.id();

        session.renew().await.unwrap();
        assert_ne!(session.id(), old_id);
        assert!(session.get("cart").is_none());
        assert!(!session.flash().has("notice"));
        assert!(session.changed());
    }

    #[tokio::test]
    async fn destroy_expires_cookie_and_entry() {
        let (manager, _) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("user", "alice");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        let loaded = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        loaded.destroy().await.unwrap();
        let mut response = HeaderMap::new();
        manager.save(&mut response, &loaded).await.unwrap();
        let removal = set_cookies(&response).remove(0);
        assert_eq!(removal.value(), "");
        assert_eq!(removal.max_age(), Some(CookieDuration::ZERO));

        let after = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        assert!(after.is_new());
    }

    #[tokio::test]
    async fn flash_survives_exactly_one_request() {
        let (manager, _) = recording_manager(config());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.flash().add("err", "a");
        session.flash().add("err", "b");
        assert!(session.changed());
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        let next = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        assert_eq!(next.flash().get_string("err"), "a");
        assert_eq!(next.flash().get_string("err"), "b");
        assert_eq!(next.flash().get("err"), None);
        let mut response = HeaderMap::new();
        manager.save(&mut response, &next).await.unwrap();

        let after = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        assert!(!after.flash().has("err"));
        assert!(!after.has(crate::models::session::FLASH_KEY));
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let manager = Manager::new(config(), FailingStore);
        let cookie = Cookie::new("sess", signing::encode_cookie_value("abc", &manager.config().keys));

        let err = manager.get(&request_with(&cookie), false, "sess").await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let manager = Manager::new(
            SessionConfig {
                store_timeout: Duration::from_millis(20),
                ..config()
            },
            SlowStore,
        );

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let err = manager.save(&mut HeaderMap::new(), &session).await.unwrap_err();
        assert!(matches!(err, SessionError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn unsigned_cookies_when_no_keys() {
        let (manager, _) = recording_manager(SessionConfig {
            keys: Vec::new(),
            ..config()
        });
        let manager = manager.with_id_generator(|| "fixed-id".to_string());

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        assert_eq!(set_cookies(&response)[0].value(), "fixed-id");
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let (manager, store) = recording_manager(SessionConfig {
            idle_timeout: Duration::from_secs(60),
            ..config()
        });

        let session = manager.get(&HeaderMap::new(), false, "sess").await.unwrap();
        session.set("k", "v");
        let mut response = HeaderMap::new();
        manager.save(&mut response, &session).await.unwrap();
        let cookie = set_cookies(&response).remove(0);

        let mut stale = store
            .inner
            .get(&session.id(), StoreOption::default())
            .await
            .unwrap();
        stale.insert(
            TIMESTAMP_KEY.to_string(),
            Value::Int(Utc::now().timestamp() - 120),
        );
        store
            .inner
            .set(&session.id(), &stale, StoreOption::default())
            .await
            .unwrap();

        let loaded = manager.get(&request_with(&cookie), false, "sess").await.unwrap();
        assert!(loaded.is_new());
    }

    #[test]
    fn secure_flag_follows_policy() {
        let (force, _) = recording_manager(SessionConfig {
            secure: SecureMode::ForceSecure,
            ..config()
        });
        let (prefer, _) = recording_manager(SessionConfig {
            secure: SecureMode::PreferSecure,
            ..config()
        });
        let (proxied, _) = recording_manager(SessionConfig {
            secure: SecureMode::PreferSecure,
            proxy: true,
            ..config()
        });

        let plain = Request::builder().uri("/").body(()).unwrap();
        let forwarded = Request::builder()
            .uri("/")
            .header("x-forwarded-proto", "https")
            .body(())
            .unwrap();
        let mut tls = Request::builder().uri("/").body(()).unwrap();
        tls.extensions_mut().insert(Tls);

        assert!(force.is_secure(&plain));
        assert!(!prefer.is_secure(&plain));
        assert!(prefer.is_secure(&tls));
        assert!(!prefer.is_secure(&forwarded));
        assert!(proxied.is_secure(&forwarded));
    }
}
