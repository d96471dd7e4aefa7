//! REST API surface.
//!
//! Thin layer: handlers translate HTTP into service calls and wrap results
//! in the uniform envelope. No handler reaches below the service layer.

pub mod auth;
pub mod chat;
pub mod error;
pub mod lobbies;
pub mod matchmaking;
pub mod notifications;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::socket::connection::websocket_handler;

pub use auth::{AuthUser, TokenVerifier};
pub use error::ApiError;

/// Build the full router against an application instance.
pub fn create_router(app: Arc<App>) -> Router {
    let cors = parse_cors(&app.config.security.cors_origins);

    let authenticated = Router::new()
        .route("/matchmaking", post(matchmaking::submit))
        .route("/matchmaking/status", get(matchmaking::status))
        .route("/matchmaking/history", get(matchmaking::history))
        .route("/matchmaking/stats", get(matchmaking::stats))
        .route("/matchmaking/{requestId}", delete(matchmaking::cancel))
        .route("/lobbies", get(lobbies::list))
        .route("/lobbies/{id}", get(lobbies::get))
        .route("/lobbies/{id}/join", post(lobbies::join))
        .route("/lobbies/{id}/leave", post(lobbies::leave))
        .route("/lobbies/{id}/ready", post(lobbies::ready))
        .route("/lobbies/{id}/start", post(lobbies::start))
        .route("/lobbies/{id}/close", post(lobbies::close))
        .route(
            "/chat/lobby/{id}/messages",
            post(chat::post_message).get(chat::history),
        )
        .route("/notifications", get(notifications::list))
        .route("/notifications/count", get(notifications::count))
        .route("/notifications/{id}/read", patch(notifications::mark_one_read))
        .route("/notifications/mark-read", post(notifications::mark_read))
        .route(
            "/notifications/mark-all-read",
            post(notifications::mark_all_read),
        )
        .route("/notifications/{id}", delete(notifications::delete))
        .route(
            "/notifications/settings",
            get(notifications::get_settings).put(notifications::put_settings),
        )
        .layer(middleware::from_fn_with_state(
            app.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

fn parse_cors(cors_origins: &str) -> CorsLayer {
    if cors_origins == "*" {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured, using permissive CORS");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Health check endpoint
async fn health_check(State(app): State<Arc<App>>) -> axum::response::Result<&'static str> {
    if app.storage.health_check().await {
        Ok("OK")
    } else {
        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE.into())
    }
}
