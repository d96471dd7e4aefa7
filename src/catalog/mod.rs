use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::domain::GameId;

/// Lookup contract against the external games database.
///
/// Catalogue ingestion and caching live outside this server; submit-time
/// validation only needs membership checks. Implementations may consult a
/// local cache and should surface upstream outages as errors so callers can
/// degrade gracefully (surfaced as 503 on the API).
#[async_trait]
pub trait GameCatalog: Send + Sync {
    /// Whether the catalogue knows this game.
    async fn contains(&self, game_id: &GameId) -> Result<bool>;

    /// First unknown game id out of `game_ids`, if any.
    async fn find_unknown(&self, game_ids: &[GameId]) -> Result<Option<GameId>> {
        for game_id in game_ids {
            if !self.contains(game_id).await? {
                return Ok(Some(game_id.clone()));
            }
        }
        Ok(None)
    }
}

/// In-memory catalogue seeded at startup. Stands in for the cached view of
/// the external games database.
#[derive(Default)]
pub struct StaticGameCatalog {
    games: RwLock<HashSet<GameId>>,
}

impl StaticGameCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_games<I, S>(games: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<GameId>,
    {
        Self {
            games: RwLock::new(games.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn insert(&self, game_id: impl Into<GameId>) {
        self.games.write().await.insert(game_id.into());
    }
}

#[async_trait]
impl GameCatalog for StaticGameCatalog {
    async fn contains(&self, game_id: &GameId) -> Result<bool> {
        Ok(self.games.read().await.contains(game_id))
    }
}
