pub mod auth;
pub mod error;
pub mod render;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use misting_core::Controller;
use tower_http::trace::TraceLayer;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    // Operator pages need a session.
    let gated = Router::new()
        .route("/", get(routes::pages::index))
        .route(
            "/switch",
            get(routes::switch::switch_relay).post(routes::switch::switch_relay),
        )
        .route("/api/events", get(routes::events::sse_events))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::require_session,
        ));

    Router::new()
        .route("/temp", get(routes::temp::get_temp))
        .route("/auth", get(routes::session::auth_page))
        .route("/login", axum::routing::post(routes::session::login))
        .route(
            "/logout",
            get(routes::session::logout).post(routes::session::logout),
        )
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Bind `addr` and serve until the task is cancelled.
pub async fn serve(controller: Arc<Controller>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(controller, listener).await
}

/// Serve on a pre-bound listener, so the caller can read the actual port
/// first (useful when binding port 0).
pub async fn serve_on(
    controller: Arc<Controller>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    if controller.config().auth.password.is_empty() {
        tracing::warn!("auth.password is empty; operator login is disabled");
    }
    let app = build_router(state::AppState::new(controller));

    tracing::info!("misting server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
