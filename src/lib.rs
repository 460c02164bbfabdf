//! Authentication and encrypted file storage built on deliberately weak
//! cryptography: guessable PRNGs, a fixed IV per namespace, unauthenticated
//! CBC cookies, and a JWT verifier that lets the token pick its own key.

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub mod config;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod ctr;
    pub mod gcm;
    pub mod random;
    pub mod weakprng;
}

pub mod models {
    pub mod key;
    pub mod query;
    pub mod session;
    pub mod share;
    pub mod user;
}

pub mod store {
    pub mod blob;
    pub mod encrypted;
    pub mod kv;
    pub mod path;
}

pub mod services {
    pub mod auth;
    pub mod cookie;
    pub mod jwk;
    pub mod keys;
    pub mod password;
    pub mod revocation;
    pub mod shares;
    pub mod token;
}

pub mod handlers {
    pub mod auth;
    pub mod blocking;
    pub mod files;
    pub mod shares;
    pub mod vulns;
}

pub mod middleware_layer {
    pub mod auth;
}

use state::AppState;

/// Builds the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/.well-known/jwks.json", get(handlers::shares::jwks))
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/api/login", post(handlers::auth::login_api))
        .route("/logout", get(handlers::auth::logout).post(handlers::auth::logout))
        .route("/api/logout", get(handlers::auth::logout).post(handlers::auth::logout))
        .route("/forgot-password", post(handlers::auth::forgot_password))
        .route("/reset-password", post(handlers::auth::reset_password))
        .route("/download", get(handlers::files::download))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::auth::me))
        .route("/api/files", get(handlers::files::list_files))
        .route(
            "/api/files/{*key}",
            put(handlers::files::upload_file)
                .get(handlers::files::download_file)
                .delete(handlers::files::delete_file),
        )
        .route(
            "/api/shares",
            get(handlers::shares::list_shares).post(handlers::shares::create_share),
        )
        .route(
            "/api/shares/{id}",
            axum::routing::delete(handlers::shares::delete_share),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/api/users",
            get(handlers::auth::list_users).post(handlers::auth::create_user),
        )
        .route_layer(from_fn(middleware_layer::auth::require_admin))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let mut vuln_routes = Router::new();
    if state.config.leak_encrypted_files {
        tracing::warn!("⚠️ Ciphertext leak routes enabled");
        vuln_routes = vuln_routes
            .route("/vulns/leak/", get(handlers::vulns::leak_index))
            .route("/vulns/leak/{*key}", get(handlers::vulns::leak_file));
    }
    if state.config.tweak_encrypted_files {
        tracing::warn!("⚠️ Ciphertext tweak route enabled");
        vuln_routes = vuln_routes.route("/vulns/tweak/{*key}", put(handlers::vulns::tweak_file));
    }
    let vuln_routes = vuln_routes.with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .merge(vuln_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(state.config.file_size_limit))
}
