//! Domain entities and pure state machines.
//!
//! Everything in this module is storage- and transport-agnostic: entities
//! carry their own invariants as methods, derived values (`member_count`,
//! `search_duration`, ...) are computed and never persisted, and the wire
//! error codes live here because they are part of the external contract.

pub mod chat;
pub mod criteria;
pub mod error_codes;
pub mod lobby;
pub mod notification;
pub mod request;
pub mod types;
pub mod user;

pub use chat::{ChatChannel, ChatHistoryPage, ChatMessage, ContentType, MessageSender};
pub use criteria::{
    FieldError, GameMode, GameSelection, GroupSize, MatchCriteria, PreferenceStrength, Region,
    SkillPreference,
};
pub use error_codes::ErrorCode;
pub use lobby::{
    Lobby, LobbyCapacity, LobbyMember, LobbySettings, LobbySnapshot, LobbyStatus, MemberSnapshot,
    MemberState,
};
pub use notification::{
    Channel, ChannelMask, DeliveryState, DeliveryStatus, Notification, NotificationIntent,
    NotificationPreferences, NotificationType, Priority, ReadStatus,
};
pub use request::{MatchRequest, RequestStatus};
pub use types::{GameId, LobbyId, NotificationId, RequestId, UserId};
pub use user::{User, UserRole, UserStatus};
