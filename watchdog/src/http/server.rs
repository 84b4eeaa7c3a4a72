use core::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    routing,
};
use eyre::WrapErr as _;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    app::{AppState, ShutdownRx, shutdown_requested},
    http::api,
};

pub(crate) fn create_app(app_state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ));

    Router::new()
        .nest("/api", api::routes())
        .with_state(app_state)
        .fallback(routing::any(|req: Request<Body>| async move {
            warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            StatusCode::NOT_FOUND
        }))
        .layer(middleware_stack)
}

/// Serve the status API on `listener` until shutdown is requested.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub(crate) async fn serve(
    app_state: AppState,
    listener: TcpListener,
    mut shutdown: ShutdownRx,
) -> eyre::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Status API listening on http://{}", addr);
    }
    axum::serve(listener, create_app(app_state))
        .with_graceful_shutdown(async move {
            shutdown_requested(&mut shutdown).await;
            info!("Received shutdown, stopping status API");
        })
        .await
        .wrap_err("Status API server failed")
}
