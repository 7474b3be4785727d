use crate::{
    catalog,
    error::AppError,
    models::{DownloadQuery, FormatsQuery, ProgressQuery},
    session::{Commit, DownloadRequest, DownloadSession, ResponseSink},
    AppState,
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

// ===================================================================
//                          VALIDATION HELPERS
// ===================================================================

/// Returns the trimmed value of a required query parameter.
fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing {}", name)))
}

// ===================================================================
//                          CATALOG HANDLER
// ===================================================================

/// # GET / - Liveness banner.
pub async fn home() -> &'static str {
    "media-relay is running"
}

/// # GET /api/formats - Lists the downloadable variants of a URL.
pub async fn list_formats(
    State(state): State<AppState>,
    Query(params): Query<FormatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let url = required(params.url, "URL")?;
    tracing::info!("Fetching formats for URL: {}", url);

    let info = state.extractor.fetch_info(&url).await?;
    let catalog = catalog::build(&info.formats, params.kind);
    tracing::info!(
        "Offering {} of {} formats for '{}'",
        catalog.len(),
        info.formats.len(),
        info.title
    );
    Ok((StatusCode::OK, Json(catalog)))
}

// ===================================================================
//                          DOWNLOAD HANDLERS
// ===================================================================

/// # GET /api/download - Streams the media bytes produced by the extractor.
///
/// The response is held back until the session produces its first byte or
/// fails, so a failure before any output still gets a clean error status.
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let url = required(params.url, "URL")?;
    let session_id = required(params.download_id, "download ID")?;
    let format = params.format.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());

    let (sink, commit) = ResponseSink::new();
    let session = DownloadSession::new(
        DownloadRequest { session_id, url, format },
        &state.config.fallback_format,
        state.sessions.clone(),
        state.extractor.clone(),
        sink,
    );
    tokio::spawn(session.run());

    match commit.await {
        Ok(Commit::Stream { extension, body }) => {
            let disposition = format!("attachment; filename=\"download.{}\"", extension);
            let headers = [
                (header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition)?),
                (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            ];
            Ok((headers, Body::from_stream(ReceiverStream::new(body))).into_response())
        }
        Ok(Commit::Failed(err)) => Err(err),
        Err(_) => Err(AppError::Internal(anyhow::anyhow!("download session ended without a response"))),
    }
}

/// # GET /api/download/progress - Server-Sent Events for one download.
pub async fn progress(
    State(state): State<AppState>,
    Query(params): Query<ProgressQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = required(params.download_id, "download ID for progress updates")?;
    tracing::info!("Attached progress stream for downloadId: {}", session_id);

    let events = state.sessions.attach_subscriber(&session_id).map(|event| Event::default().json_data(event));
    let headers = [(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"))];
    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())))
}
