//! Signed-cookie HTTP sessions for axum, backed by pluggable stores.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod manager;
pub mod router;
pub mod state;

pub mod crypto {
    pub mod id;
    pub mod signing;
}

pub mod models {
    pub mod flash;
    pub mod session;
    pub mod value;
}

pub mod store {
    pub mod contract;
    pub mod memory;
    pub mod postgres;
    pub mod redis;

    pub use self::contract::{Store, StoreOption};
    pub use self::memory::MemoryStore;
    pub use self::postgres::PostgresStore;
    pub use self::redis::RedisStore;
}

pub mod middleware_layer {
    pub mod session;
}

pub mod handlers {
    pub mod session;
}

pub use config::{Config, SecureMode, SessionConfig, StoreBackend};
pub use error::{Result, SessionError};
pub use manager::{Manager, Tls};
pub use middleware_layer::session::{SessionScope, session_scope};
pub use models::flash::Flash;
pub use models::session::{Session, SessionFlash};
pub use models::value::{Data, Value};
pub use store::{MemoryStore, PostgresStore, RedisStore, Store, StoreOption};
