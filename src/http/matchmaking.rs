use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::domain::criteria::MatchCriteria;
use crate::domain::request::RequestStatus;
use crate::domain::types::{GameId, RequestId};

use super::auth::{ensure_admin, AuthUser};
use super::error::{created, success, ApiError};

/// `POST /matchmaking`
pub async fn submit(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Json(criteria): Json<MatchCriteria>,
) -> Result<Response, ApiError> {
    let request = app.matchmaking.submit(auth.user_id, criteria).await?;
    Ok(created(json!({ "matchRequest": request })))
}

/// `GET /matchmaking/status`
pub async fn status(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    match app.matchmaking.status(&auth.user_id).await? {
        Some(view) => Ok(success(json!({
            "matchRequest": view.request,
            "queueInfo": view.queue_info,
        }))),
        None => Ok(success(json!({ "matchRequest": null }))),
    }
}

/// `DELETE /matchmaking/{requestId}`
pub async fn cancel(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(request_id): Path<RequestId>,
) -> Result<Response, ApiError> {
    let request = app.matchmaking.cancel(&auth.user_id, &request_id).await?;
    Ok(success(json!({ "matchRequest": request })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub game_id: Option<GameId>,
    pub status: Option<RequestStatus>,
}

fn default_limit() -> usize {
    20
}

/// `GET /matchmaking/history`
pub async fn history(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let (requests, total) = app
        .matchmaking
        .history(
            &auth.user_id,
            query.game_id.as_ref(),
            query.status,
            query.page,
            query.limit,
        )
        .await?;
    Ok(success(json!({
        "requests": requests,
        "page": query.page,
        "limit": query.limit,
        "total": total,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

/// `GET /matchmaking/stats` (admin)
pub async fn stats(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    ensure_admin(&auth)?;
    let report = app.matchmaking.stats(query.hours).await?;
    Ok(success(report))
}
