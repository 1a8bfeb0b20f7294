//! HLS routes.
//!
//! `GET /video/{name}.m3u8` starts the stream on demand and returns its
//! manifest once it exists. The manifest points at
//! `/video/{name}/segment_NNNNN.ts`, which is served straight from the
//! output store and only keeps an already running stream alive.

use std::path::PathBuf;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::services::ServeFile;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::error::Error;
use crate::utils::fs;
use crate::utils::stream_name::{is_valid_segment_name, is_valid_stream_name};

const MANIFEST_SUFFIX: &str = ".m3u8";
const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Create the video router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{file}", get(get_manifest))
        .route("/{name}/{segment}", get(get_segment))
}

async fn get_manifest(
    State(state): State<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let Some(name) = file.strip_suffix(MANIFEST_SUFFIX) else {
        return Err(ApiError::not_found(format!("No such resource: {file}")));
    };
    if !is_valid_stream_name(name) {
        return Err(Error::InvalidStreamName(name.to_string()).into());
    }

    let source_url = state
        .resolver
        .resolve(name)
        .ok_or_else(|| Error::UnknownStream(name.to_string()))?;

    let ready = state.manager.resolve_and_touch(name, &source_url).await?;

    let mut response = serve_file(ready.manifest_path, request, MANIFEST_CONTENT_TYPE).await?;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

async fn get_segment(
    State(state): State<AppState>,
    Path((name, segment)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    if !is_valid_stream_name(&name) {
        return Err(Error::InvalidStreamName(name).into());
    }
    if !is_valid_segment_name(&segment) {
        return Err(ApiError::bad_request(format!(
            "Invalid segment name {segment:?}"
        )));
    }

    let path = state.manager.segment_path(&name, &segment);
    if !fs::file_exists(&path).await {
        return Err(ApiError::not_found(format!(
            "Segment {segment} of stream {name} not found"
        )));
    }

    state.manager.touch(&name);
    serve_file(path, request, SEGMENT_CONTENT_TYPE).await
}

/// Serve `path` honoring range and conditional headers of `request`.
async fn serve_file(
    path: PathBuf,
    request: Request,
    content_type: &'static str,
) -> ApiResult<Response> {
    let response = ServeFile::new(path)
        .try_call(request)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to serve file: {e}")))?;

    // Rolled out of the window between the existence check and the open.
    if response.status() == StatusCode::NOT_FOUND {
        return Err(ApiError::not_found("File no longer available"));
    }

    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    Ok(response)
}
