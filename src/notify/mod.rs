//! Notification intent bus.
//!
//! Services hand the bus an intent; the bus resolves the recipient's channel
//! preferences, persists a notification record, pushes `notification:new`
//! in-app, and queues push/email jobs for the dispatch workers. Delivery
//! failures never propagate back to the call that triggered the
//! notification.

pub mod dispatch;

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::error_codes::ErrorCode;
use crate::domain::notification::{
    Channel, DeliveryState, Notification, NotificationIntent, NotificationPreferences, ReadStatus,
};
use crate::domain::types::{NotificationId, UserId};
use crate::socket::{EventBus, ServerEvent};
use crate::storage::{NotificationFilter, Storage};

pub use dispatch::{
    spawn_email_worker, spawn_push_worker, BatchConfig, EmailJob, EmailTransport,
    LogEmailTransport, LogPushTransport, PushJob, PushTransport,
};

/// Default retention for read/archived notifications.
pub const DEFAULT_SWEEP_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl NotifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Storage(_) => ErrorCode::InternalServerError,
        }
    }
}

/// Result of a mark-read call: how many records changed plus the new unread
/// total pushed to the user's room.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadOutcome {
    pub modified_count: u64,
    pub unread: u64,
}

pub struct NotificationService {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    push_tx: mpsc::Sender<PushJob>,
    email_tx: mpsc::Sender<EmailJob>,
}

impl NotificationService {
    pub fn new(
        storage: Arc<dyn Storage>,
        bus: Arc<EventBus>,
        push_tx: mpsc::Sender<PushJob>,
        email_tx: mpsc::Sender<EmailJob>,
    ) -> Self {
        Self {
            storage,
            bus,
            push_tx,
            email_tx,
        }
    }

    /// Create a notification for `user_id` from an intent.
    ///
    /// In-app emission happens before the delivered flag is recorded, so the
    /// flag never claims a delivery the room did not see. Push/email enqueue
    /// waits for queue space rather than dropping.
    pub async fn create(
        &self,
        user_id: UserId,
        intent: NotificationIntent,
    ) -> Result<Notification, NotifyError> {
        let preferences = self
            .storage
            .get_user(&user_id)
            .await?
            .map(|u| u.notification_preferences)
            .unwrap_or_else(NotificationPreferences::default);

        let notification = Notification::from_intent(user_id, intent, &preferences, Utc::now());
        self.storage.insert_notification(notification.clone()).await?;

        self.bus.emit_user(
            &user_id,
            &Arc::new(ServerEvent::NotificationNew {
                notification: Box::new(notification.clone()),
            }),
        );
        self.storage
            .set_delivery_state(&notification.id, Channel::InApp, DeliveryState::Delivered)
            .await?;

        if notification.channels.contains(&Channel::Push) {
            let job = PushJob {
                notification_id: notification.id,
                user_id,
                title: notification.title.clone(),
                body: notification.body.clone(),
            };
            if self.push_tx.send(job).await.is_err() {
                warn!(notification_id = %notification.id, "push queue closed; intent dropped");
            }
        }
        if notification.channels.contains(&Channel::Email) {
            let job = EmailJob {
                notification_id: notification.id,
                user_id,
                subject: notification.title.clone(),
                body: notification.body.clone(),
            };
            if self.email_tx.send(job).await.is_err() {
                warn!(notification_id = %notification.id, "email queue closed; intent dropped");
            }
        }

        Ok(notification)
    }

    pub async fn list(
        &self,
        user_id: &UserId,
        filter: NotificationFilter,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Notification>, usize), NotifyError> {
        Ok(self
            .storage
            .list_notifications(user_id, filter, page, limit)
            .await?)
    }

    pub async fn unread_count(&self, user_id: &UserId) -> Result<u64, NotifyError> {
        Ok(self.storage.unread_count(user_id).await?)
    }

    pub async fn mark_read(
        &self,
        user_id: &UserId,
        ids: &[NotificationId],
    ) -> Result<MarkReadOutcome, NotifyError> {
        let modified_count = self.storage.mark_notifications_read(user_id, ids).await?;
        let unread = self.emit_unread_count(user_id).await?;
        Ok(MarkReadOutcome {
            modified_count,
            unread,
        })
    }

    pub async fn mark_all_read(&self, user_id: &UserId) -> Result<MarkReadOutcome, NotifyError> {
        let modified_count = self.storage.mark_all_notifications_read(user_id).await?;
        let unread = self.emit_unread_count(user_id).await?;
        Ok(MarkReadOutcome {
            modified_count,
            unread,
        })
    }

    pub async fn delete(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<(), NotifyError> {
        if self
            .storage
            .delete_notification(user_id, notification_id)
            .await?
        {
            Ok(())
        } else {
            Err(NotifyError::NotFound)
        }
    }

    pub async fn settings(&self, user_id: &UserId) -> Result<NotificationPreferences, NotifyError> {
        Ok(self
            .storage
            .get_user(user_id)
            .await?
            .map(|u| u.notification_preferences)
            .unwrap_or_default())
    }

    pub async fn update_settings(
        &self,
        user_id: &UserId,
        preferences: NotificationPreferences,
    ) -> Result<NotificationPreferences, NotifyError> {
        if self
            .storage
            .update_notification_preferences(user_id, preferences)
            .await?
        {
            Ok(preferences)
        } else {
            Err(NotifyError::NotFound)
        }
    }

    /// Delete read/archived notifications older than `days_to_keep`.
    pub async fn sweep(&self, days_to_keep: i64) -> Result<u64, NotifyError> {
        let cutoff = Utc::now() - Duration::days(days_to_keep);
        Ok(self.storage.sweep_notifications(cutoff).await?)
    }

    async fn emit_unread_count(&self, user_id: &UserId) -> Result<u64> {
        let unread = self.storage.unread_count(user_id).await?;
        self.bus
            .emit_user(user_id, &Arc::new(ServerEvent::NotificationCount { unread }));
        Ok(unread)
    }
}

/// Convenience: filter for unread records only.
pub fn unread_filter() -> NotificationFilter {
    NotificationFilter {
        status: Some(ReadStatus::Unread),
        ..Default::default()
    }
}
