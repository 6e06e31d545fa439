use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Extracts the session token from the request cookies.
///
/// # Arguments
///
/// * `cookies` - The request cookies.
///
/// # Returns
///
/// An `Option` containing the session ID if found.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that requires a valid session to be present.
///
/// Resolving the session goes through the store, so every authenticated
/// request also slides the session's expiry. The session is inserted into
/// the request extensions.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `StatusCode`.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    tracing::debug!("🔐 Checking authentication...");

    let session_id = extract_session_token(&cookies).ok_or_else(|| {
        tracing::warn!("❌ No session_id cookie found");
        StatusCode::FORBIDDEN
    })?;

    let session = state
        .sessions
        .get_session(&session_id)
        .await
        .map_err(|e| match e {
            AppError::BackendUnavailable(_) => {
                tracing::error!("❌ Session backend unavailable: {}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                tracing::warn!("❌ Unreadable session {}: {}", session_id, e);
                StatusCode::FORBIDDEN
            }
        })?
        .ok_or_else(|| {
            tracing::warn!("❌ Session not found or expired: {}", session_id);
            StatusCode::FORBIDDEN
        })?;

    tracing::debug!("✅ User authenticated: {}", session.user_id);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}
