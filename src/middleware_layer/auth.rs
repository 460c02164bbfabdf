use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    error::Result,
    models::session::Session,
    services::cookie::COOKIE_NAME,
    state::AppState,
};

/// The raw `auth` cookie value, if the request has one.
pub fn session_cookie(cookies: &Cookies) -> Option<String> {
    cookies.get(COOKIE_NAME).map(|c| c.value().to_string())
}

/// The raw `Authorization` header, if it is valid ASCII.
pub fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Resolves whichever session the request carries.
pub async fn request_session(state: &AppState, cookies: &Cookies, headers: &HeaderMap) -> Result<Option<Session>> {
    let cookie = session_cookie(cookies);
    state
        .auth
        .current_session(cookie.as_deref(), authorization_header(headers))
        .await
}

/// A middleware that requires a valid session to be present.
///
/// A malformed credential is a 400 and a missing, revoked or expired one a
/// 401. On success the `Session` is inserted as a request extension.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    tracing::debug!("🔐 Checking authentication...");

    let session = request_session(&state, &cookies, request.headers())
        .await
        .map_err(|e| {
            tracing::warn!("❌ Bad credential: {}", e);
            StatusCode::BAD_REQUEST
        })?
        .ok_or_else(|| {
            tracing::debug!("❌ No session");
            StatusCode::UNAUTHORIZED
        })?;

    tracing::debug!("✅ User authenticated: {}", session.username);
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Lets only admins through. Must run inside [`require_auth`].
pub async fn require_admin(request: Request<Body>, next: Next) -> std::result::Result<Response, StatusCode> {
    match request.extensions().get::<Session>() {
        Some(session) if session.is_admin => Ok(next.run(request).await),
        Some(session) => {
            tracing::warn!("❌ {:?} is not an admin", session.username);
            Err(StatusCode::FORBIDDEN)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
