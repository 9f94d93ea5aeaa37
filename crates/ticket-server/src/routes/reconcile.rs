use axum::extract::State;
use axum::http::StatusCode;

use crate::error::AppError;
use crate::state::AppState;

/// GET /CreateTickets, POST /api/reconcile: run one reconciliation pass.
///
/// `200` with an empty body on success; the pass report only goes to the log.
pub async fn run_reconcile(State(app): State<AppState>) -> Result<StatusCode, AppError> {
    let report = app.reconciler.run_pass().await?;
    tracing::debug!(?report, "reconcile request served");
    Ok(StatusCode::OK)
}
