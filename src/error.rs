use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

// Every failure a request can surface. Session-level failures (spawn, download)
// travel from the orchestrator task to the handler through the response sink.
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    BadRequest(String),
    Spawn(String),
    Extraction(String),
    Download(String),
    Conflict(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_)
            | AppError::Spawn(_)
            | AppError::Extraction(_)
            | AppError::Download(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::Internal(e) => {
                // Log the full chain; the client only gets a generic message.
                tracing::error!("Internal server error: {:?}", e);
                "An internal server error occurred".to_string()
            }
            AppError::Spawn(e) => format!("failed to start extractor: {}", e),
            AppError::Extraction(e) => format!("yt-dlp error: {}", e),
            AppError::Download(e) => e,
            AppError::BadRequest(e) | AppError::Conflict(e) => e,
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

// Lets `?` turn any `std::error::Error` (or anyhow error) into `AppError::Internal`.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
