use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::domain::chat::ContentType;
use crate::domain::types::LobbyId;

use super::auth::AuthUser;
use super::error::{created, success, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageBody {
    pub content: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
}

/// `POST /chat/lobby/{id}/messages`
pub async fn post_message(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
    Json(body): Json<PostMessageBody>,
) -> Result<Response, ApiError> {
    let message = app
        .chat
        .post(
            &lobby_id,
            auth.user_id,
            &body.content,
            body.content_type.unwrap_or_default(),
        )
        .await?;
    Ok(created(json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
}

/// `GET /chat/lobby/{id}/messages`
pub async fn history(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(lobby_id): Path<LobbyId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let page = app
        .chat
        .history(&lobby_id, &auth.user_id, query.limit, query.before)
        .await?;
    Ok(success(json!({
        "chatId": page.chat_id,
        "messages": page.messages,
        "hasMore": page.has_more,
    })))
}
