use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    middleware_layer::session::SessionScope,
    models::value::Value,
    state::AppState,
};

const USER_ID_KEY: &str = "user_id";
const VISITS_KEY: &str = "visits";
const NOTICE_KEY: &str = "notice";

/// The request payload for signing in.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub user_id: String,
}

/// The request payload for queueing a flash message.
#[derive(Deserialize, Debug)]
pub struct FlashRequest {
    #[serde(default)]
    pub key: Option<String>,
    pub message: String,
}

/// Query for consuming flash messages.
#[derive(Deserialize, Debug)]
pub struct FlashQuery {
    #[serde(default)]
    pub key: Option<String>,
}

/// The response payload describing the current session.
#[derive(Serialize)]
pub struct SessionResponse {
    pub user_id: Option<String>,
    pub visits: i64,
    pub new_session: bool,
}

/// The response payload for consumed flash messages.
#[derive(Serialize)]
pub struct FlashResponse {
    pub messages: Vec<String>,
}

/// Counts visits in the session and reports who is signed in.
///
/// A request presenting a rotated-away id past the grace window is treated as
/// a stolen cookie: the session is destroyed and the request rejected.
pub async fn visit(State(state): State<AppState>, scope: SessionScope) -> Result<Response> {
    let session = scope.get(&state.session_name).await?;

    if session.hijacked() {
        tracing::warn!("🚨 Rotated session id {} presented again", session.id());
        session.destroy().await?;
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    let visits = session.get_int(VISITS_KEY) + 1;
    session.set(VISITS_KEY, visits);

    let user_id = Some(session.get_string(USER_ID_KEY)).filter(|id| !id.is_empty());

    Ok(Json(SessionResponse {
        user_id,
        visits,
        new_session: session.is_new(),
    })
    .into_response())
}

/// Signs a user in, renewing the session so nothing from before survives.
pub async fn login(
    State(state): State<AppState>,
    scope: SessionScope,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    let session = scope.get(&state.session_name).await?;
    session.renew().await?;
    session.set(USER_ID_KEY, payload.user_id.clone());
    session
        .flash()
        .add(NOTICE_KEY, format!("Signed in as {}", session.get_string(USER_ID_KEY)));

    tracing::info!("✅ Session {} signed in", session.id());

    Ok(Json(SessionResponse {
        user_id: Some(payload.user_id),
        visits: 0,
        new_session: session.is_new(),
    })
    .into_response())
}

/// Destroys the session and expires its cookie.
pub async fn logout(State(state): State<AppState>, scope: SessionScope) -> Result<StatusCode> {
    let session = scope.get(&state.session_name).await?;
    session.destroy().await?;
    tracing::info!("✅ Session {} destroyed", session.id());
    Ok(StatusCode::NO_CONTENT)
}

/// Rotates the session id, keeping the data.
pub async fn rotate(State(state): State<AppState>, scope: SessionScope) -> Result<StatusCode> {
    let session = scope.get(&state.session_name).await?;
    session.regenerate().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queues a flash message for the next request.
pub async fn add_flash(
    State(state): State<AppState>,
    scope: SessionScope,
    Json(payload): Json<FlashRequest>,
) -> Result<StatusCode> {
    let session = scope.get(&state.session_name).await?;
    let key = payload.key.unwrap_or_else(|| NOTICE_KEY.to_string());
    session.flash().add(key, payload.message);
    Ok(StatusCode::ACCEPTED)
}

/// Consumes every queued flash message for a key.
pub async fn take_flash(
    State(state): State<AppState>,
    scope: SessionScope,
    Query(query): Query<FlashQuery>,
) -> Result<Json<FlashResponse>> {
    let session = scope.get(&state.session_name).await?;
    let key = query.key.unwrap_or_else(|| NOTICE_KEY.to_string());

    let messages = session
        .flash()
        .values(&key)
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect();

    Ok(Json(FlashResponse { messages }))
}
