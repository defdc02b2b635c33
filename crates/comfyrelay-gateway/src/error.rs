//! Error to HTTP response mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use comfyrelay_core::Error;
use tracing::{error, warn};

/// Wraps a core error so handlers can `?` straight into a response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::MalformedTemplate(_) | Error::InvalidRequest(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::SubmissionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::UploadFailed(_)
            | Error::ArtifactUnresolvable { .. }
            | Error::ChannelClosed(_)
            | Error::Engine(_) => StatusCode::BAD_GATEWAY,
            Error::ChannelUnavailable(_) | Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::PostProcess(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{} ({})", self.0, status);
        } else {
            warn!("{} ({})", self.0, status);
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
