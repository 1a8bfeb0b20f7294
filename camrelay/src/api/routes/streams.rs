//! Stream management routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::error::Error;
use crate::stream::{StopOutcome, StreamPhase};
use crate::utils::stream_name::is_valid_stream_name;

/// One entry of `GET /api/streams`.
#[derive(Debug, Serialize)]
pub struct StreamInfo {
    pub name: String,
    pub state: StreamPhase,
    pub source_url: String,
    pub pid: Option<u32>,
    pub idle_secs: u64,
    pub age_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_type: Option<String>,
}

/// Create the streams router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_streams))
        .route("/{name}", delete(stop_stream))
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamInfo>> {
    let now = Instant::now();
    let streams = state
        .manager
        .list()
        .into_iter()
        .map(|s| StreamInfo {
            video_type: state.resolver.video_type(&s.name),
            idle_secs: s.idle_at(now).as_secs(),
            age_secs: now.saturating_duration_since(s.created_at).as_secs(),
            source_url: redact_credentials(&s.source_url),
            state: s.phase,
            pid: s.pid,
            name: s.name,
        })
        .collect();
    Json(streams)
}

async fn stop_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if !is_valid_stream_name(&name) {
        return Err(Error::InvalidStreamName(name).into());
    }

    match state.manager.stop(&name).await {
        StopOutcome::Stopped => Ok(StatusCode::NO_CONTENT),
        StopOutcome::Busy => Err(ApiError::conflict(format!(
            "Stream {name} is starting or stopping"
        ))),
        StopOutcome::NotFound => Err(ApiError::not_found(format!("Stream {name} is not running"))),
    }
}

/// Hide `user:password@` in a source URL. Anything that does not parse as
/// a URL (device paths) is returned as-is.
fn redact_credentials(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.username().is_empty() && url.password().is_none() {
        return raw.to_string();
    }
    if url.set_password(None).is_err() || url.set_username("***").is_err() {
        return "<redacted>".to_string();
    }
    url.to_string()
}
