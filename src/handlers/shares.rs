use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    handlers::blocking::run_blocking,
    models::{session::Session, share::Link},
    services::jwk::{build_jwks, JwkSet},
    state::AppState,
};

#[derive(Deserialize, Debug)]
pub struct ShareRequest {
    pub key: String,
}

#[derive(Serialize)]
pub struct ShareList {
    pub links: Vec<Link>,
}

/// Signs a link to one of the caller's files.
pub async fn create_share(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ShareRequest>,
) -> Result<(StatusCode, Json<Link>)> {
    let shares = state.shares.clone();
    let link = run_blocking(move || shares.signed_link(&session.username, &payload.key)).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn list_shares(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<ShareList>> {
    let shares = state.shares.clone();
    let links = run_blocking(move || shares.list(&session.username)).await?;
    Ok(Json(ShareList { links }))
}

pub async fn delete_share(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let shares = state.shares.clone();
    run_blocking(move || shares.delete(&session.username, &id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Public verification keys for bearer tokens.
pub async fn jwks(State(state): State<AppState>) -> Result<Json<JwkSet>> {
    Ok(Json(build_jwks(&state.keys)?))
}
