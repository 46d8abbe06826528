//! HTTP handlers behind the signed access URLs handed out with each photo.
//! Bodies are streamed from disk, never buffered.

use crate::{errors::AppError, models::object::StoredObject, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Query string carried by every signed URL.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// GET `/objects/{*key}?expires=&signature=`: stream the object.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    state.store.verify_access(&key, q.expires, &q.signature)?;
    let (meta, file) = state.store.open(&key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(
        response.headers_mut(),
        &meta,
        state.store.seconds_until(q.expires),
    );
    Ok(response)
}

/// HEAD `/objects/{*key}?expires=&signature=`: same headers as GET, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    state.store.verify_access(&key, q.expires, &q.signature)?;
    let (meta, _file) = state.store.open(&key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(
        response.headers_mut(),
        &meta,
        state.store.seconds_until(q.expires),
    );
    Ok(response)
}

/// Guess a content type from the key's extension.
fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// `max_age` is how long the signed URL stays valid; browsers may cache
/// the body until then.
fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject, max_age: i64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&meta.key)),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Ok(value) = HeaderValue::from_str(&format!("private, max-age={}", max_age)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
}
