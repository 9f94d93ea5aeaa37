use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use ticket_core::types::{snooze_until, RecommendationRow, Ticket, TicketStatus};

use crate::error::AppError;
use crate::state::AppState;

/// POST /tickets: create a ticket directly on the backend and record it.
///
/// There is no recommendation behind a manual ticket, so the backend gets an
/// empty context carrying only the target resource.
pub async fn create_ticket(
    State(app): State<AppState>,
    Json(mut ticket): Json<Ticket>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let context = RecommendationRow {
        target_resource: ticket.target_resource.clone(),
        ..Default::default()
    };
    let now = Utc::now();
    ticket.status.get_or_insert(TicketStatus::New);
    ticket.creation_date = now;
    ticket.last_update_date = now;
    ticket.snooze_date = snooze_until(now);

    let issue_key = app.backend.create_ticket(&mut ticket, &context).await?;
    ticket.issue_key = issue_key.clone();
    app.tickets.append_tickets(std::slice::from_ref(&ticket)).await?;
    tracing::info!(%issue_key, "created ticket on request");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "issue_key": issue_key })),
    ))
}

/// GET /tickets/{issue_key}
pub async fn get_ticket(
    State(app): State<AppState>,
    Path(issue_key): Path<String>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = app.backend.get_ticket(&issue_key).await?;
    Ok(Json(ticket))
}

/// PUT /tickets/{issue_key}/close: `400` if the ticket cannot be loaded.
pub async fn close_ticket(
    State(app): State<AppState>,
    Path(issue_key): Path<String>,
) -> Result<StatusCode, AppError> {
    if let Err(e) = app.backend.get_ticket(&issue_key).await {
        return Err(AppError::bad_request(e.to_string()));
    }
    app.backend.close_ticket(&issue_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
