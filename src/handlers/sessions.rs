use std::time::Duration;

use axum::{
    Extension,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sonic_rs::Value;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::SESSION_COOKIE,
    models::session::Session,
    state::AppState,
    validation::session::validate_user_id,
};

/// The request payload for session creation.
#[derive(Deserialize, Debug)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// The request payload for replacing a session's payload.
#[derive(Deserialize, Debug)]
pub struct UpdateSessionRequest {
    pub payload: Value,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct UserSessionsResponse {
    pub user_id: String,
    pub sessions: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct DestroyedResponse {
    pub destroyed: usize,
}

/// The response payload for operations with no other result.
#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    sonic_rs::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Serialization(format!("Response serialization failed: {}", e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Session ids that do not parse cannot name a live session.
fn parse_session_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

/// Creates the session cookie, living as long as the session's TTL.
fn create_session_cookie(value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, value);
    cookie.set_http_only(true);
    if secure {
        cookie.set_secure(true);
    }
    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    cookie.set_max_age(CookieDuration::seconds(max_age_secs));
    cookie.set_path("/");
    cookie
}

/// Handles session creation.
#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    cookies: Cookies,
    body: Bytes,
) -> Result<Response> {
    let request: CreateSessionRequest = parse_body(&body)?;
    validate_user_id(&request.user_id)?;

    let session_id = state
        .sessions
        .create_session(&request.user_id, request.payload)
        .await?;

    cookies.add(create_session_cookie(
        session_id.to_string(),
        state.sessions.default_ttl(),
        state.config.production,
    ));
    tracing::debug!("🍪 Session cookie added: {}={}", SESSION_COOKIE, session_id);

    json_response(StatusCode::CREATED, &CreateSessionResponse { session_id })
}

/// Handles session lookup; every hit slides the session's expiry.
#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id).ok_or(AppError::NotFound)?;
    let session = state
        .sessions
        .get_session(&session_id)
        .await?
        .ok_or(AppError::NotFound)?;

    json_response(StatusCode::OK, &session)
}

/// Handles payload replacement.
#[axum::debug_handler]
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id).ok_or(AppError::NotFound)?;
    let request: UpdateSessionRequest = parse_body(&body)?;

    if !state
        .sessions
        .update_session(&session_id, &request.payload)
        .await?
    {
        return Err(AppError::NotFound);
    }

    json_response(
        StatusCode::OK,
        &ActionResponse {
            success: true,
            message: "Session updated".to_string(),
        },
    )
}

/// Handles session destruction. Unknown ids succeed as well.
#[axum::debug_handler]
pub async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode> {
    if let Some(session_id) = parse_session_id(&session_id) {
        state.sessions.destroy_session(&session_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Reports the number of live sessions.
#[axum::debug_handler]
pub async fn count_sessions(State(state): State<AppState>) -> Result<Response> {
    let active_sessions = state.sessions.count_active_sessions().await?;
    json_response(StatusCode::OK, &CountResponse { active_sessions })
}

/// Lists the session ids indexed for a user.
#[axum::debug_handler]
pub async fn list_user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    let sessions = state.sessions.list_user_sessions(&user_id).await?;
    json_response(StatusCode::OK, &UserSessionsResponse { user_id, sessions })
}

/// Destroys every session of a user.
#[axum::debug_handler]
pub async fn destroy_user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response> {
    validate_user_id(&user_id)?;
    let destroyed = state.sessions.destroy_user_sessions(&user_id).await?;
    json_response(StatusCode::OK, &DestroyedResponse { destroyed })
}

/// Returns the caller's own session.
#[axum::debug_handler]
pub async fn current_session(Extension(session): Extension<Session>) -> Result<Response> {
    json_response(StatusCode::OK, &session)
}

/// Destroys the caller's session and clears its cookie.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!("👋 Logout for user: {}", session.user_id);

    state.sessions.destroy_session(&session.session_id).await?;

    let mut session_cookie = Cookie::new(SESSION_COOKIE, "");
    session_cookie.set_max_age(CookieDuration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    json_response(
        StatusCode::OK,
        &ActionResponse {
            success: true,
            message: "Logout successful".to_string(),
        },
    )
}
