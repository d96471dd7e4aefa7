use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{NotificationId, UserId};

/// Notification type tag. Preferences are keyed by this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    MatchFound,
    LobbyInvite,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Delivery channels a notification can travel over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Push,
    Email,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Pending,
    Delivered,
    Failed,
}

/// Per-channel delivery progress. Channels the notification does not use
/// stay `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub in_app: DeliveryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<DeliveryState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<DeliveryState>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    #[default]
    Unread,
    Read,
    Archived,
}

/// Which channels a user wants for one notification type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMask {
    pub in_app: bool,
    pub push: bool,
    pub email: bool,
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self {
            in_app: true,
            push: true,
            email: false,
        }
    }
}

impl ChannelMask {
    pub fn all() -> Self {
        Self {
            in_app: true,
            push: true,
            email: true,
        }
    }
}

/// Per-user notification preferences, keyed by type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub match_found: ChannelMask,
    pub lobby_invite: ChannelMask,
    pub system: ChannelMask,
}

impl NotificationPreferences {
    pub fn mask_for(&self, kind: NotificationType) -> ChannelMask {
        match kind {
            NotificationType::MatchFound => self.match_found,
            NotificationType::LobbyInvite => self.lobby_invite,
            NotificationType::System => self.system,
        }
    }
}

/// An intent to notify, as produced by the core services. The bus resolves
/// the effective channel set against the recipient's preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A persisted per-user notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub channels: Vec<Channel>,
    pub delivery: DeliveryStatus,
    pub status: ReadStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Materialize an intent for a recipient. `Urgent` priority forces every
    /// channel regardless of preferences; in-app is always on.
    pub fn from_intent(
        user_id: UserId,
        intent: NotificationIntent,
        preferences: &NotificationPreferences,
        now: DateTime<Utc>,
    ) -> Self {
        let mask = if intent.priority == Priority::Urgent {
            ChannelMask::all()
        } else {
            preferences.mask_for(intent.kind)
        };

        let mut channels = vec![Channel::InApp];
        let mut delivery = DeliveryStatus::default();
        if mask.push {
            channels.push(Channel::Push);
            delivery.push = Some(DeliveryState::Pending);
        }
        if mask.email {
            channels.push(Channel::Email);
            delivery.email = Some(DeliveryState::Pending);
        }

        Self {
            id: Uuid::new_v4(),
            user_id,
            kind: intent.kind,
            title: intent.title,
            body: intent.body,
            priority: intent.priority,
            channels,
            delivery,
            status: ReadStatus::Unread,
            data: intent.data,
            created_at: now,
            expires_at: intent.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(priority: Priority) -> NotificationIntent {
        NotificationIntent {
            kind: NotificationType::MatchFound,
            title: "Match found".into(),
            body: "Your group is ready".into(),
            priority,
            data: serde_json::Value::Null,
            expires_at: None,
        }
    }

    #[test]
    fn preferences_select_channels() {
        let prefs = NotificationPreferences {
            match_found: ChannelMask {
                in_app: true,
                push: false,
                email: true,
            },
            ..Default::default()
        };
        let n = Notification::from_intent(Uuid::new_v4(), intent(Priority::High), &prefs, Utc::now());
        assert_eq!(n.channels, vec![Channel::InApp, Channel::Email]);
        assert!(n.delivery.push.is_none());
        assert_eq!(n.delivery.email, Some(DeliveryState::Pending));
    }

    #[test]
    fn urgent_forces_all_channels() {
        let prefs = NotificationPreferences {
            match_found: ChannelMask {
                in_app: true,
                push: false,
                email: false,
            },
            ..Default::default()
        };
        let n =
            Notification::from_intent(Uuid::new_v4(), intent(Priority::Urgent), &prefs, Utc::now());
        assert_eq!(
            n.channels,
            vec![Channel::InApp, Channel::Push, Channel::Email]
        );
    }

    #[test]
    fn in_app_is_always_present() {
        let prefs = NotificationPreferences {
            match_found: ChannelMask {
                in_app: false,
                push: false,
                email: false,
            },
            ..Default::default()
        };
        let n = Notification::from_intent(Uuid::new_v4(), intent(Priority::Low), &prefs, Utc::now());
        assert_eq!(n.channels, vec![Channel::InApp]);
        assert_eq!(n.status, ReadStatus::Unread);
    }
}
