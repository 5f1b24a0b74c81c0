use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_cookies::cookie::SameSite;
use zeroize::{Zeroize, Zeroizing};

/// How long a rotated-away id may keep being presented before it counts as
/// evidence of a stolen cookie.
pub const DEFAULT_HIJACK_GRACE: Duration = Duration::from_secs(5 * 60);

/// Upper bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Policy for the `Secure` cookie attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecureMode {
    /// Never set `Secure`.
    #[default]
    NoSecure,
    /// Set `Secure` when the request arrived over TLS (or, with `proxy`,
    /// when a trusted proxy says so).
    PreferSecure,
    /// Always set `Secure`.
    ForceSecure,
}

impl FromStr for SecureMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "no" | "none" | "false" => Ok(SecureMode::NoSecure),
            "prefer" => Ok(SecureMode::PreferSecure),
            "force" | "true" => Ok(SecureMode::ForceSecure),
            other => anyhow::bail!("unknown secure mode: {}", other),
        }
    }
}

/// The session manager's configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Salt for hashing raw ids into store keys.
    pub secret: Zeroizing<Vec<u8>>,
    /// Cookie signing keys. The first key signs, any key verifies.
    pub keys: Vec<Zeroizing<Vec<u8>>>,
    /// The cookie `Domain` attribute.
    pub domain: Option<String>,
    /// The cookie `Path` attribute.
    pub path: String,
    /// The cookie `HttpOnly` attribute.
    pub http_only: bool,
    /// The `Secure` attribute policy.
    pub secure: SecureMode,
    /// Trust `X-Forwarded-Proto` when `secure` is `PreferSecure`.
    pub proxy: bool,
    /// The cookie `SameSite` attribute.
    pub same_site: Option<SameSite>,
    /// The cookie `Max-Age`. Zero makes a browser-session cookie.
    pub max_age: Duration,
    /// Store TTL. Zero falls back to `max_age`.
    pub idle_timeout: Duration,
    /// Re-emit the cookie and extend the store TTL on every access.
    pub rolling: bool,
    /// Write to the store even when nothing changed.
    pub resave: bool,
    /// Delete the old entry on regenerate instead of leaving a destroyed marker.
    pub delete_old_session: bool,
    /// Use the raw id as the store key. Debug only.
    pub disable_hash_id: bool,
    /// See [`DEFAULT_HIJACK_GRACE`].
    pub hijack_grace: Duration,
    /// See [`DEFAULT_STORE_TIMEOUT`].
    pub store_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: Zeroizing::new(Vec::new()),
            keys: Vec::new(),
            domain: None,
            path: "/".to_string(),
            http_only: true,
            secure: SecureMode::NoSecure,
            proxy: false,
            same_site: Some(SameSite::Lax),
            max_age: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            rolling: false,
            resave: false,
            delete_old_session: false,
            disable_hash_id: false,
            hijack_grace: DEFAULT_HIJACK_GRACE,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("keys", &self.keys.len())
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("http_only", &self.http_only)
            .field("secure", &self.secure)
            .field("proxy", &self.proxy)
            .field("same_site", &self.same_site)
            .field("max_age", &self.max_age)
            .field("idle_timeout", &self.idle_timeout)
            .field("rolling", &self.rolling)
            .field("resave", &self.resave)
            .field("delete_old_session", &self.delete_old_session)
            .field("disable_hash_id", &self.disable_hash_id)
            .finish()
    }
}

impl SessionConfig {
    /// The TTL handed to the store.
    pub fn store_ttl(&self) -> Duration {
        if self.idle_timeout.is_zero() {
            self.max_age
        } else {
            self.idle_timeout
        }
    }

    /// Creates a new `SessionConfig` from `SESSION_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let secret = match env::var("SESSION_SECRET") {
            Ok(mut secret_hex) => {
                let bytes = hex::decode(&secret_hex)
                    .context("SESSION_SECRET must be valid hexadecimal")?;
                secret_hex.zeroize();
                Zeroizing::new(bytes)
            }
            Err(_) => defaults.secret.clone(),
        };

        let keys = match env::var("SESSION_KEYS") {
            Ok(mut keys_hex) => {
                let keys = keys_hex
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| {
                        hex::decode(k)
                            .map(Zeroizing::new)
                            .context("SESSION_KEYS must be comma separated hexadecimal")
                    })
                    .collect::<Result<Vec<_>>>()?;
                keys_hex.zeroize();
                keys
            }
            Err(_) => Vec::new(),
        };

        let same_site = match env::var("SESSION_SAME_SITE")
            .unwrap_or_else(|_| "lax".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "lax" => Some(SameSite::Lax),
            "strict" => Some(SameSite::Strict),
            "none" => Some(SameSite::None),
            "" | "unset" => None,
            other => anyhow::bail!("Invalid SESSION_SAME_SITE: {}", other),
        };

        Ok(Self {
            secret,
            keys,
            domain: env::var("SESSION_DOMAIN").ok().filter(|d| !d.is_empty()),
            path: env::var("SESSION_PATH").unwrap_or(defaults.path),
            http_only: env_or("SESSION_HTTP_ONLY", defaults.http_only)?,
            secure: env_or("SESSION_SECURE", defaults.secure)?,
            proxy: env_or("SESSION_PROXY", defaults.proxy)?,
            same_site,
            max_age: Duration::from_secs(env_or("SESSION_MAX_AGE_SECS", 0u64)?),
            idle_timeout: Duration::from_secs(env_or("SESSION_IDLE_TIMEOUT_SECS", 0u64)?),
            rolling: env_or("SESSION_ROLLING", defaults.rolling)?,
            resave: env_or("SESSION_RESAVE", defaults.resave)?,
            delete_old_session: env_or("SESSION_DELETE_OLD", defaults.delete_old_session)?,
            disable_hash_id: env_or("SESSION_DISABLE_HASH_ID", defaults.disable_hash_id)?,
            hijack_grace: Duration::from_secs(env_or(
                "SESSION_HIJACK_GRACE_SECS",
                DEFAULT_HIJACK_GRACE.as_secs(),
            )?),
            store_timeout: Duration::from_millis(env_or(
                "SESSION_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            )?),
        })
    }
}

/// Which store backend the server runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process map with a background sweeper.
    Memory,
    /// Redis at the given URL.
    Redis(String),
    /// PostgreSQL at the given URL.
    Postgres(String),
}

/// The server's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The address the HTTP server binds to.
    pub bind_addr: String,
    /// The session store backend.
    pub store: StoreBackend,
    /// Table used by the PostgreSQL store.
    pub session_table: String,
    /// Key prefix used by the Redis store.
    pub redis_prefix: String,
    /// Name of the session cookie.
    pub session_name: String,
    /// The session manager configuration.
    pub session: SessionConfig,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let store = match env::var("SESSION_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis(
                env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ),
            "postgres" => StoreBackend::Postgres(
                env::var("DATABASE_URL")
                    .context("DATABASE_URL must be set when SESSION_STORE=postgres")?,
            ),
            other => anyhow::bail!("Invalid SESSION_STORE: {}", other),
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            store,
            session_table: env::var("SESSION_TABLE").unwrap_or_else(|_| "sessions".to_string()),
            redis_prefix: env::var("SESSION_REDIS_PREFIX").unwrap_or_else(|_| "session:".to_string()),
            session_name: env::var("SESSION_NAME").unwrap_or_else(|_| "sess".to_string()),
            session: SessionConfig::from_env()?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
