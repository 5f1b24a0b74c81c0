use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers;
use crate::middleware_layer::session::session_scope;
use crate::state::AppState;

/// Builds the demo application: session routes wrapped in the session scope
/// middleware and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::session::visit))
        .route("/login", post(handlers::session::login))
        .route("/logout", post(handlers::session::logout))
        .route("/rotate", post(handlers::session::rotate))
        .route(
            "/flash",
            get(handlers::session::take_flash).post(handlers::session::add_flash),
        )
        .route_layer(from_fn_with_state(state.manager.clone(), session_scope))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
}
