use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, Result},
    handlers::blocking::run_blocking,
    middleware_layer::auth::{authorization_header, session_cookie},
    models::session::Session,
    services::{auth::NewUser, cookie::COOKIE_NAME, password},
    state::AppState,
};

/// The request payload for user login.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

impl AuthResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub username: String,
}

/// Stands in for the email a real deployment would send.
#[derive(Serialize)]
pub struct SimulatedEmail {
    pub email: String,
    pub username: String,
    pub nonce: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub username: String,
    pub nonce: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Serialize)]
pub struct UserList {
    pub users: Vec<String>,
}

async fn check_credentials(state: &AppState, payload: LoginRequest) -> Result<crate::models::user::User> {
    tracing::info!("🔐 Login attempt for {}", payload.username);
    let auth = state.auth.clone();
    run_blocking(move || auth.authenticate(&payload.username, &payload.password)).await
}

/// Password login that answers with a bearer token.
#[axum::debug_handler]
pub async fn login_api(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> Result<Response> {
    let user = check_credentials(&state, payload).await?;
    let token = state
        .auth
        .tokens()
        .new_token(&user.username, &user.real_name, &user.roles)?;

    tracing::info!("✅ Token issued for {}", user.username);
    Ok(Json(TokenResponse { token }).into_response())
}

/// Password login that answers with the session cookie.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(payload): Form<LoginRequest>,
) -> Result<Response> {
    let user = check_credentials(&state, payload).await?;
    let cookie = state
        .auth
        .cookies()
        .new_cookie(&user.username, &user.real_name, &user.roles)?;
    cookies.add(cookie);

    tracing::info!("✅ User logged in: {}", user.username);
    Ok(AuthResponse::ok("Login successful").into_response())
}

/// Revokes the cookie and bearer token the request carried, if any.
pub async fn logout(State(state): State<AppState>, cookies: Cookies, headers: HeaderMap) -> Result<Response> {
    let cookie = session_cookie(&cookies);
    state.auth.logout(cookie.as_deref(), authorization_header(&headers));

    let mut session_cookie = Cookie::new(COOKIE_NAME, "");
    session_cookie.set_max_age(Duration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    tracing::info!("✅ Logged out");
    Ok(AuthResponse::ok("Logout successful").into_response())
}

pub async fn me(Extension(session): Extension<Session>) -> Json<Session> {
    Json(session)
}

async fn store_user(state: &AppState, new_user: NewUser) -> Result<Response> {
    let auth = state.auth.clone();
    let user = run_blocking(move || auth.create_user(new_user)).await?;
    let location = format!("/api/users/{}", user.username);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(user)).into_response())
}

/// Self-service registration. Roles in the payload are ignored.
#[axum::debug_handler]
pub async fn register(State(state): State<AppState>, Json(mut payload): Json<NewUser>) -> Result<Response> {
    tracing::info!("📝 Register attempt for {}", payload.username);
    payload.roles.clear();
    store_user(&state, payload).await
}

/// Admin-only user creation, roles included.
pub async fn create_user(State(state): State<AppState>, Json(payload): Json<NewUser>) -> Result<Response> {
    store_user(&state, payload).await
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<UserList>> {
    let store = state.auth.users().clone();
    let users = run_blocking(move || store.list_keys()).await?;
    Ok(Json(UserList { users }))
}

/// Issues a reset nonce and "mails" it back in the response.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<SimulatedEmail>> {
    let users = state.auth.users().clone();
    let random = state.random.clone();
    let username = payload.username;

    let (nonce, user) = run_blocking(move || {
        let nonce = password::generate_reset_nonce(&users, &random, &username)?;
        Ok((nonce, users.get(&username)?))
    })
    .await?;

    let email = if user.email.is_empty() {
        format!("{}@example.com", user.username)
    } else {
        user.email
    };
    Ok(Json(SimulatedEmail {
        email,
        username: user.username,
        nonce,
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Response> {
    if payload.password != payload.confirm_password {
        return Err(AppError::Validation("passwords do not match".to_string()));
    }

    let users = state.auth.users().clone();
    run_blocking(move || {
        password::reset_password(&users, &payload.username, &payload.nonce, &payload.password)
    })
    .await?;

    Ok(AuthResponse::ok("Password changed successfully").into_response())
}
