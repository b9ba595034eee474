use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use wapb_lib::Error;

/// HTTP face of a library error. Server-side causes are logged here and never
/// reach the client.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Decode(_) | Error::GroupDeleted(_) => StatusCode::BAD_REQUEST,
            Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Storage(_) | Error::CannotRedact(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
            return (status, "internal error").into_response();
        }
        tracing::debug!(error = %self.0, %status, "request rejected");
        (status, self.0.to_string()).into_response()
    }
}
