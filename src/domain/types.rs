use uuid::Uuid;

/// Unique identifier for users
pub type UserId = Uuid;
/// Unique identifier for match requests
pub type RequestId = Uuid;
/// Unique identifier for lobbies
pub type LobbyId = Uuid;
/// Unique identifier for notifications
pub type NotificationId = Uuid;

/// Identifier of a game in the external catalogue (slug, e.g. "rocket-rumble").
///
/// The catalogue itself is an external collaborator; the server only checks
/// membership at submit time.
pub type GameId = String;

/// Maximum games per match request
pub const MAX_GAMES_PER_REQUEST: usize = 5;
/// Weight bounds for a game selection
pub const MIN_GAME_WEIGHT: u8 = 1;
pub const MAX_GAME_WEIGHT: u8 = 10;
/// Maximum language codes per request
pub const MAX_LANGUAGES_PER_REQUEST: usize = 10;
/// Group size hard ceiling
pub const MAX_GROUP_SIZE: u8 = 100;
/// Furthest ahead a request may be scheduled
pub const MAX_SCHEDULE_AHEAD_DAYS: i64 = 7;
/// Skill level used when a player has no profile for the bucket game
pub const DEFAULT_SKILL_LEVEL: u8 = 50;
/// Chat message size ceiling after trimming, in bytes
pub const MAX_CHAT_MESSAGE_BYTES: usize = 2_000;
/// Largest chat history page
pub const MAX_CHAT_HISTORY_LIMIT: usize = 200;
