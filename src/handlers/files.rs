use std::io::{Read, Write};

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result},
    handlers::blocking::run_blocking,
    middleware_layer::auth::request_session,
    models::{session::Session, share::Link},
    store::{blob::Metadata, encrypted::EncryptedStore, path},
    state::AppState,
};

#[derive(Serialize)]
pub struct FileList {
    pub files: Vec<Metadata>,
}

/// `key` joined under the caller's namespace, refused if it climbs out.
fn own_key(session: &Session, key: &str) -> Result<String> {
    let full = path::join(&[&session.username, key]);
    if !full.starts_with(&format!("{}/", session.username)) {
        tracing::warn!("❌ {} asked for {:?}", session.username, key);
        return Err(AppError::Unauthorized);
    }
    Ok(full)
}

/// Decrypts a whole object and wraps it as an attachment.
async fn send_object(files: EncryptedStore, namespace: String, object_key: String) -> Result<Response> {
    let (body, meta) = run_blocking(move || {
        let (mut reader, meta) = files.get_object(&namespace, &object_key)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok((body, meta))
    })
    .await?;

    let filename = meta.key.rsplit('/').next().unwrap_or_default().replace('"', "");
    tracing::debug!("📥 Sending {} ({} bytes)", meta.key, body.len());

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        body,
    )
        .into_response())
}

/// Lists the caller's files with plaintext sizes and namespace-relative keys.
pub async fn list_files(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<FileList>> {
    let prefix = format!("{}/", session.username);
    let files = state.files.clone();
    let list_prefix = prefix.clone();
    let mut objects = run_blocking(move || files.list_objects_with_prefix(&list_prefix)).await?;

    for m in &mut objects {
        if let Some(rest) = m.key.strip_prefix(&prefix) {
            m.key = rest.to_string();
        }
    }
    Ok(Json(FileList { files: objects }))
}

/// Stores the request body as `key`, encrypted under the caller's namespace.
#[axum::debug_handler]
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let object_key = own_key(&session, &key)?;
    tracing::info!("📤 Upload {} ({} bytes)", object_key, body.len());

    let files = state.files.clone();
    let namespace = session.username.clone();
    run_blocking(move || {
        let mut writer = files.put_object(&namespace, &object_key)?;
        writer.write_all(&body)?;
        writer.finish()?.flush()?;
        Ok(())
    })
    .await?;

    let location = format!("/download?{}", Link::new(&key, None).query_string());
    Ok((StatusCode::CREATED, [(header::LOCATION, location)]).into_response())
}

pub async fn download_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(key): Path<String>,
) -> Result<Response> {
    let object_key = own_key(&session, &key)?;
    send_object(state.files.clone(), session.username, object_key).await
}

/// Deleting a missing file still succeeds.
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    let object_key = own_key(&session, &key)?;
    let files = state.files.clone();
    match run_blocking(move || files.delete_object(&object_key)).await {
        Ok(_) | Err(AppError::NotFound) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e),
    }
}

/// Serves a share link, or an unsigned link to one of the caller's own files.
pub async fn download(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let session = request_session(&state, &cookies, &headers).await.ok().flatten();
    let target = state
        .shares
        .resolve_download(query.as_deref().unwrap_or_default(), session.as_ref())?;

    let object_key = target.object_key();
    send_object(state.files.clone(), target.namespace, object_key).await
}
