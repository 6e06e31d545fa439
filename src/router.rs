use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tracing::Level;

use crate::{
    handlers::sessions,
    middleware_layer::{admin::require_admin, auth::require_auth},
    state::AppState,
    validation::session::MAX_BODY_BYTES,
};

/// Builds the HTTP router exposing the session operations.
///
/// Session management sits behind the admin token. Only `/api/me` and
/// `/api/logout` accept the session cookie.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// The configured `Router`.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/count", get(sessions::count_sessions))
        .route(
            "/api/sessions/{session_id}",
            get(sessions::get_session)
                .put(sessions::update_session)
                .delete(sessions::destroy_session),
        )
        .route(
            "/api/users/{user_id}/sessions",
            get(sessions::list_user_sessions).delete(sessions::destroy_user_sessions),
        )
        .route_layer(from_fn_with_state(state.clone(), require_admin))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/me", get(sessions::current_session))
        .route("/api/logout", post(sessions::logout))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(admin_routes)
        .merge(protected_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
