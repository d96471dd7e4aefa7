use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::domain::notification::{
    NotificationPreferences, NotificationType, Priority, ReadStatus,
};
use crate::domain::types::NotificationId;
use crate::storage::NotificationFilter;

use super::auth::AuthUser;
use super::error::{success, ApiError};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub status: Option<ReadStatus>,
    #[serde(rename = "type")]
    pub kind: Option<NotificationType>,
    pub priority: Option<Priority>,
}

fn default_limit() -> usize {
    20
}

/// `GET /notifications`
pub async fn list(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let filter = NotificationFilter {
        status: query.status,
        kind: query.kind,
        priority: query.priority,
    };
    let limit = query.limit.clamp(1, 100);
    let (notifications, total) = app
        .notifications
        .list(&auth.user_id, filter, query.page, limit)
        .await?;
    Ok(success(json!({
        "notifications": notifications,
        "page": query.page,
        "limit": limit,
        "total": total,
    })))
}

/// `GET /notifications/count`
pub async fn count(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let unread = app.notifications.unread_count(&auth.user_id).await?;
    Ok(success(json!({ "unread": unread })))
}

/// `PATCH /notifications/{id}/read`
pub async fn mark_one_read(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(notification_id): Path<NotificationId>,
) -> Result<Response, ApiError> {
    let outcome = app
        .notifications
        .mark_read(&auth.user_id, &[notification_id])
        .await?;
    Ok(success(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    pub notification_ids: Vec<NotificationId>,
}

/// `POST /notifications/mark-read`
pub async fn mark_read(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<MarkReadBody>,
) -> Result<Response, ApiError> {
    let outcome = app
        .notifications
        .mark_read(&auth.user_id, &body.notification_ids)
        .await?;
    Ok(success(outcome))
}

/// `POST /notifications/mark-all-read`
pub async fn mark_all_read(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let outcome = app.notifications.mark_all_read(&auth.user_id).await?;
    Ok(success(outcome))
}

/// `DELETE /notifications/{id}`
pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Path(notification_id): Path<NotificationId>,
) -> Result<Response, ApiError> {
    app.notifications
        .delete(&auth.user_id, &notification_id)
        .await?;
    Ok(success(json!({ "deleted": true })))
}

/// `GET /notifications/settings`
pub async fn get_settings(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let settings = app.notifications.settings(&auth.user_id).await?;
    Ok(success(json!({ "settings": settings })))
}

/// `PUT /notifications/settings`
pub async fn put_settings(
    State(app): State<Arc<App>>,
    Extension(auth): Extension<AuthUser>,
    Json(preferences): Json<NotificationPreferences>,
) -> Result<Response, ApiError> {
    let settings = app
        .notifications
        .update_settings(&auth.user_id, preferences)
        .await?;
    Ok(success(json!({ "settings": settings })))
}
