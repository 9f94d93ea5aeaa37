use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ticket_core::backend::{WebhookReply, WebhookRequest};

use crate::error::AppError;
use crate::state::AppState;

/// POST /webhooks: hand headers and raw body to the active backend.
pub async fn handle_webhook(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let headers = headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
    });
    let request = WebhookRequest::new(headers, body.to_vec());
    tracing::debug!(bytes = request.body.len(), "webhook received");

    match app.backend.handle_webhook_action(request).await? {
        WebhookReply::Ack => Ok(StatusCode::OK.into_response()),
        WebhookReply::Json(value) => Ok((StatusCode::OK, Json(value)).into_response()),
    }
}
