use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ticket_core::TicketError;

/// Carries an explicit 400 through the `anyhow::Error` chain.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses. Renders `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<TicketError>() {
            Some(TicketError::TicketNotFound(_)) => StatusCode::NOT_FOUND,
            Some(
                TicketError::InvalidLabels { .. }
                | TicketError::InvalidSnooze(_)
                | TicketError::Config(_)
                | TicketError::Json(_),
            ) => StatusCode::BAD_REQUEST,
            Some(TicketError::Signature(_)) => StatusCode::UNAUTHORIZED,
            Some(TicketError::Backend(_)) => StatusCode::BAD_GATEWAY,
            Some(
                TicketError::Query(_)
                | TicketError::Commit(_)
                | TicketError::UnknownBackend(_)
                | TicketError::Schema(_)
                | TicketError::Timeout(_)
                | TicketError::Io(_)
                | TicketError::Yaml(_),
            )
            | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
