use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{Extensions, HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::error::{Result, SessionError};
use crate::manager::Manager;
use crate::models::session::Session;

struct ScopeInner {
    manager: Manager,
    headers: HeaderMap,
    secure: bool,
    sessions: Mutex<HashMap<String, Session>>,
    saved: AtomicBool,
}

/// Binds a [`Manager`] to one in-flight request.
///
/// Each session name is loaded at most once per request; later lookups get
/// the same handle. Every session handed out is saved when the response
/// leaves the handler.
#[derive(Clone)]
pub struct SessionScope {
    inner: Arc<ScopeInner>,
}

impl SessionScope {
    /// Creates a new `SessionScope` for `req`.
    pub fn new<B>(manager: Manager, req: &Request<B>) -> Self {
        let secure = manager.is_secure(req);
        Self {
            inner: Arc::new(ScopeInner {
                manager,
                headers: req.headers().clone(),
                secure,
                sessions: Mutex::new(HashMap::new()),
                saved: AtomicBool::new(false),
            }),
        }
    }

    pub fn manager(&self) -> &Manager {
        &self.inner.manager
    }

    /// Returns the session named `name`, loading it on first use.
    pub async fn get(&self, name: &str) -> Result<Session> {
        let mut sessions = self.inner.sessions.lock().await;

        if let Some(session) = sessions.get(name) {
            return Ok(session.clone());
        }

        let session = self
            .inner
            .manager
            .get(&self.inner.headers, self.inner.secure, name)
            .await?;
        sessions.insert(name.to_string(), session.clone());

        Ok(session)
    }

    /// Saves every session acquired in this request into `headers`.
    ///
    /// Only the first call does anything. All sessions are attempted even if
    /// one fails; the first failure is returned.
    pub async fn save_all(&self, headers: &mut HeaderMap) -> Result<()> {
        if self.inner.saved.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sessions: Vec<Session> = self.inner.sessions.lock().await.values().cloned().collect();

        let mut first_error = None;
        for session in &sessions {
            if let Err(e) = self.inner.manager.save(headers, session).await {
                tracing::error!("❌ Failed to save session {}: {}", session.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Looks up the session named `name` through the scope stored in
/// `extensions`.
///
/// Fails with [`SessionError::NotPassMiddleware`] when [`session_scope`] is
/// not installed.
pub async fn get(extensions: &Extensions, name: &str) -> Result<Session> {
    let scope = extensions
        .get::<SessionScope>()
        .ok_or(SessionError::NotPassMiddleware)?;
    scope.get(name).await
}

impl<S> FromRequestParts<S> for SessionScope
where
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<SessionScope>()
            .cloned()
            .ok_or(SessionError::NotPassMiddleware)
    }
}

/// A middleware that installs a [`SessionScope`] for the request.
///
/// Sessions are saved after the handler returns and before the response is
/// handed back to the server. If the handler panics, sessions are still saved
/// and the panic is resumed. A failed save turns the response into an error.
///
/// # Arguments
///
/// * `manager` - The session manager.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
pub async fn session_scope(
    State(manager): State<Manager>,
    mut req: Request,
    next: Next,
) -> Response {
    let scope = SessionScope::new(manager, &req);
    req.extensions_mut().insert(scope.clone());

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(mut response) => {
            if let Err(e) = scope.save_all(response.headers_mut()).await {
                return e.into_response();
            }
            response
        }
        Err(panic) => {
            tracing::error!("❌ Handler panicked, saving sessions before unwinding");
            if let Err(e) = scope.save_all(&mut HeaderMap::new()).await {
                tracing::error!("❌ Session save after panic failed: {}", e);
            }
            std::panic::resume_unwind(panic)
        }
    }
}
