use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::domain::types::LobbyId;

use super::auth::AuthUser;
use super::error::{success, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub include_history: bool,
}

/// `GET /lobbies`
pub async fn list(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let lobbies = app
        .lobbies
        .list(&auth.user_id, query.include_history)
        .await?;
    Ok(success(json!({ "lobbies": lobbies })))
}

/// `GET /lobbies/{id}`
pub async fn get(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Response, ApiError> {
    let lobby = app.lobbies.get(&lobby_id, &auth.user_id).await?;
    Ok(success(json!({ "lobby": lobby })))
}

/// `POST /lobbies/{id}/join`
pub async fn join(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Response, ApiError> {
    let lobby = app.lobbies.join(&lobby_id, auth.user_id).await?;
    Ok(success(json!({ "lobby": lobby })))
}

/// `POST /lobbies/{id}/leave`
pub async fn leave(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Response, ApiError> {
    let lobby = app.lobbies.leave(&lobby_id, auth.user_id).await?;
    Ok(success(json!({ "lobby": lobby })))
}

#[derive(Debug, Deserialize)]
pub struct ReadyBody {
    pub ready: bool,
}

/// `POST /lobbies/{id}/ready`
pub async fn ready(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
    Json(body): Json<ReadyBody>,
) -> Result<Response, ApiError> {
    let lobby = app
        .lobbies
        .set_ready(&lobby_id, auth.user_id, body.ready)
        .await?;
    Ok(success(json!({ "lobby": lobby })))
}

/// `POST /lobbies/{id}/start`
pub async fn start(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Response, ApiError> {
    let lobby = app.lobbies.start(&lobby_id, &auth.user_id).await?;
    Ok(success(json!({ "lobby": lobby })))
}

/// `POST /lobbies/{id}/close`
pub async fn close(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Response, ApiError> {
    let lobby = app.lobbies.close(&lobby_id, &auth.user_id, false).await?;
    Ok(success(json!({ "lobby": lobby })))
}
