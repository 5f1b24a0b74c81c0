use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The session subsystem's error type.
///
/// `NotFound` and `SignatureInvalid` are expected traffic and are absorbed by
/// the [`Manager`](crate::manager::Manager); they never reach a handler.
/// Everything in the store-unavailable class is propagated.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The store has no live entry for the requested key.
    #[error("session: not found")]
    NotFound,

    /// The cookie signature did not match any configured key.
    #[error("session: invalid signature")]
    SignatureInvalid,

    /// The store did not answer in time or the call was cancelled.
    #[error("session: store unavailable: {0}")]
    StoreUnavailable(String),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Session data could not be encoded or decoded.
    #[error("session: codec error: {0}")]
    Codec(String),

    /// A session was requested on a request that did not pass through the
    /// session middleware.
    #[error("session: request not pass middleware")]
    NotPassMiddleware,
}

/// A `Result` type that uses `SessionError` as the error type.
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Returns `true` for backend I/O failures, which must never be masked as
    /// an anonymous session.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            SessionError::StoreUnavailable(_)
                | SessionError::Redis(_)
                | SessionError::Postgres(_)
                | SessionError::Pool(_)
        )
    }

    /// Returns `true` if this is a store miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound)
    }
}

impl From<bincode::error::EncodeError> for SessionError {
    fn from(e: bincode::error::EncodeError) -> Self {
        SessionError::Codec(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for SessionError {
    fn from(e: bincode::error::DecodeError) -> Self {
        SessionError::Codec(e.to_string())
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let message = match self {
            SessionError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                "Cache error"
            }

            SessionError::Postgres(ref e) => {
                tracing::error!("Database error: {}", e);
                "Database error"
            }

            SessionError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                "Database error"
            }

            SessionError::StoreUnavailable(ref msg) => {
                tracing::error!("Session store unavailable: {}", msg);
                "Session store unavailable"
            }

            SessionError::Codec(ref msg) => {
                tracing::error!("Session codec error: {}", msg);
                "Internal server error"
            }

            SessionError::NotPassMiddleware => {
                tracing::error!("Session accessed without the session middleware installed");
                "Internal server error"
            }

            SessionError::NotFound | SessionError::SignatureInvalid => {
                tracing::debug!("Session identity error reached a handler: {}", self);
                "Internal server error"
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
