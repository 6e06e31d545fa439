use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Extracts the bearer token from the `Authorization` header.
fn extract_bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// A middleware that restricts the session management routes to callers
/// holding the configured admin token.
///
/// Without a configured token every request is refused.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `StatusCode`.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        tracing::warn!("❌ Admin route requested but ADMIN_TOKEN is not configured");
        return Err(StatusCode::FORBIDDEN);
    };

    let presented = extract_bearer_token(&request).ok_or_else(|| {
        tracing::warn!("❌ Admin route requested without a bearer token");
        StatusCode::FORBIDDEN
    })?;

    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("❌ Admin token mismatch");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
