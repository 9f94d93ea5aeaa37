use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /healthz: liveness plus the active backend name.
pub async fn healthz(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "backend": app.backend.name(),
    }))
}
