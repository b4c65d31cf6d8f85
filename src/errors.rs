use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::services::booking_flow::BookingError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("appointment rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Booking(#[from] BookingError),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Backend(format!("{e:#}"))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
            AppError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Booking(e) => match e {
                BookingError::NotOpen
                | BookingError::InvalidTransition { .. }
                | BookingError::SubmissionInProgress => StatusCode::CONFLICT,
                BookingError::Validation(_)
                | BookingError::Field(_)
                | BookingError::DateNotInFuture { .. }
                | BookingError::SlotUnavailable(_)
                | BookingError::SubmissionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                BookingError::Submission(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
