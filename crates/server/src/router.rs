use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use depesche_core::config::ServerConfig;

use crate::api;
use crate::auth;
use crate::state::AppState;

/// Assemble the full route tree. `/health` stays open; everything under
/// `/api` sits behind the bearer-token gate.
pub fn build_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/channels", get(api::channels_list).post(api::channels_upsert))
        .route("/posts", get(api::posts_list))
        .route("/ticks", get(api::ticks_list).post(api::ticks_trigger))
        .route("/status", get(api::status))
        .route("/config", get(api::config_view))
        .layer(middleware::from_fn_with_state(
            server.api_token.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(api::health))
        .nest("/api", api)
        .layer(cors_layer(&server.cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(origin, "invalid CORS origin, falling back to permissive");
            CorsLayer::permissive()
        }
    }
}
