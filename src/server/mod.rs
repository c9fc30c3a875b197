use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{VcsError, VcsResult};
use crate::manager::VersionManager;

pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<VersionManager>,
}

/// JSON API over a [`VersionManager`].
pub fn router(manager: Arc<VersionManager>) -> Router {
    let state = AppState { manager };

    Router::new()
        .route("/health", get(health))
        .route("/listings/:listing_id/versions", post(handlers::save_version))
        .route("/listings/:listing_id/auto-version", post(handlers::auto_version))
        .route("/listings/:listing_id/timeline", get(handlers::timeline))
        .route("/listings/:listing_id/export", get(handlers::export))
        .route(
            "/listings/:listing_id/branches",
            get(handlers::branches).post(handlers::create_branch),
        )
        .route(
            "/listings/:listing_id/branches/:branch/latest",
            get(handlers::latest),
        )
        .route(
            "/listings/:listing_id/branches/:branch/versions/:version_id",
            get(handlers::get_version),
        )
        .route("/listings/:listing_id/compare", get(handlers::compare))
        .route(
            "/listings/:listing_id/compare-branches",
            get(handlers::compare_branches),
        )
        .route("/listings/:listing_id/rollback", post(handlers::rollback))
        .route("/listings/:listing_id/merge", post(handlers::merge))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn run_http_server(config: &ServerConfig, manager: Arc<VersionManager>) -> VcsResult<()> {
    let app = router(manager);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|err| VcsError::ConfigError(format!("invalid server address: {err}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| VcsError::Internal(format!("failed to bind server: {err}")))?;

    info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .map_err(|err| VcsError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
