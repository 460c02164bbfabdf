//! Unauthenticated access to the stored ciphertexts. Mounted only when the
//! matching config flag is on.

use std::io::{Read, Write};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::Result,
    handlers::{blocking::run_blocking, files::FileList},
    state::AppState,
};

/// Every stored object, with ciphertext sizes and full keys.
pub async fn leak_index(State(state): State<AppState>) -> Result<Json<FileList>> {
    let files = state.files.clone();
    let objects = run_blocking(move || files.list_raw_objects()).await?;
    Ok(Json(FileList { files: objects }))
}

/// The stored bytes of `key`, exactly as encrypted.
pub async fn leak_file(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response> {
    let files = state.files.clone();
    let body = run_blocking(move || {
        let (mut reader, _) = files.get_raw_object(&key)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(body)
    })
    .await?;

    tracing::debug!("🕳️ Leaked {} ciphertext bytes", body.len());
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

/// Replaces the stored bytes of `key` with the request body.
pub async fn tweak_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<StatusCode> {
    tracing::warn!("🔧 Raw overwrite of {} ({} bytes)", key, body.len());

    let files = state.files.clone();
    run_blocking(move || {
        let mut writer = files.put_raw_object(&key)?;
        writer.write_all(&body)?;
        writer.flush()?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::ACCEPTED)
}
