pub mod backends;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        // Reconciliation trigger (legacy path kept for existing schedulers)
        .route("/CreateTickets", get(routes::reconcile::run_reconcile))
        .route("/api/reconcile", post(routes::reconcile::run_reconcile))
        // Tickets
        .route("/tickets", post(routes::tickets::create_ticket))
        .route("/tickets/{issue_key}", get(routes::tickets::get_ticket))
        .route(
            "/tickets/{issue_key}/close",
            put(routes::tickets::close_ticket),
        )
        // Webhooks
        .route("/webhooks", post(routes::webhooks::handle_webhook))
        .route("/healthz", get(routes::health::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the ticket service on `0.0.0.0:<port>`.
pub async fn serve(app_state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(app_state, listener).await
}

/// Start the ticket service on a pre-bound listener.
///
/// The caller can read the actual port before starting (useful when
/// `port = 0` and the OS picks a free port).
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let backend = app_state.backend.name();
    let app = build_router(app_state);

    tracing::info!(backend, "ticket service listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("ticket service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
