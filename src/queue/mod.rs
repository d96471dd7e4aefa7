use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    criteria::{GameMode, Region},
    request::MatchRequest,
    types::{GameId, RequestId, UserId},
};

/// How long a request may sit in a bucket before the sweep expires it.
pub const QUEUE_ENTRY_MAX_AGE_SECS: i64 = 30 * 60;

/// Value-typed composite bucket key.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct BucketKey {
    pub game_id: GameId,
    pub mode: GameMode,
    pub region: Region,
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.game_id,
            serde_json::to_string(&self.mode)
                .unwrap_or_default()
                .trim_matches('"'),
            serde_json::to_string(&self.region)
                .unwrap_or_default()
                .trim_matches('"'),
        )
    }
}

/// Lightweight reference held inside buckets; the full request lives in
/// storage and is re-read at formation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub search_start_time: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The user already has an entry in the index.
    #[error("user {0} already has an active request in the queue")]
    DuplicateActiveRequest(UserId),
    /// The request's primary game could not be resolved.
    #[error("request {0} has no resolvable primary game")]
    InvalidPrimary(RequestId),
}

#[derive(Debug, Clone)]
struct UserEntry {
    request_id: RequestId,
    game_id: GameId,
    mode: GameMode,
    regions: Vec<Region>,
    search_start_time: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    /// game -> mode -> region -> ordered request refs
    buckets: HashMap<GameId, HashMap<GameMode, HashMap<Region, Vec<QueuedRequest>>>>,
    /// reverse per-user index
    users: HashMap<UserId, UserEntry>,
}

/// The in-memory queue index: constant-time bucket lookup plus a per-user
/// existence check. Ephemeral by design — rebuilt at startup from all
/// `searching` requests in storage.
///
/// All mutations are serialized under a single lock; reads hand out
/// snapshots, so iteration never observes a partial removal. Bucket inserts
/// emit a request-added signal on a typed channel consumed by the
/// coordinator's worker (no in-process pub/sub).
pub struct QueueIndex {
    state: Mutex<QueueState>,
    signal: mpsc::UnboundedSender<BucketKey>,
}

impl QueueIndex {
    /// Build the index along with the receiving end of the request-added
    /// signal channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BucketKey>) {
        let (signal, receiver) = mpsc::unbounded_channel();
        (
            Self {
                state: Mutex::new(QueueState::default()),
                signal,
            },
            receiver,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned queue lock is unrecoverable; propagate the inner state
        // rather than wedging every subsequent caller.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a request under each region it lists. A request listing
    /// `[NA, EU]` is visible in both buckets; formation de-duplicates by
    /// request id.
    pub fn add(&self, request: &MatchRequest) -> Result<(), QueueError> {
        if request.criteria.primary_game().is_none() {
            return Err(QueueError::InvalidPrimary(request.id));
        }
        let game_id = request.primary_game.clone();
        let mode = request.criteria.game_mode;
        let regions = request.criteria.regions.clone();

        let mut state = self.lock();
        if state.users.contains_key(&request.user_id) {
            return Err(QueueError::DuplicateActiveRequest(request.user_id));
        }

        let entry = QueuedRequest {
            request_id: request.id,
            user_id: request.user_id,
            search_start_time: request.search_start_time,
        };
        for region in &regions {
            let bucket = state
                .buckets
                .entry(game_id.clone())
                .or_default()
                .entry(mode)
                .or_default()
                .entry(*region)
                .or_default();
            // Keep the bucket ordered by search start (stable for equal
            // instants): scheduled requests can arrive out of order.
            let position = bucket
                .iter()
                .rposition(|e| e.search_start_time <= entry.search_start_time)
                .map_or(0, |i| i + 1);
            bucket.insert(position, entry.clone());
        }
        state.users.insert(
            request.user_id,
            UserEntry {
                request_id: request.id,
                game_id: game_id.clone(),
                mode,
                regions: regions.clone(),
                search_start_time: request.search_start_time,
            },
        );
        drop(state);

        for region in regions {
            let _ = self.signal.send(BucketKey {
                game_id: game_id.clone(),
                mode,
                region,
            });
        }
        Ok(())
    }

    /// Remove a user's entry. Idempotent; prunes empty inner maps.
    pub fn remove(&self, user_id: &UserId, request_id: &RequestId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.users.get(user_id) else {
            return false;
        };
        if &entry.request_id != request_id {
            return false;
        }
        let entry = entry.clone();
        state.users.remove(user_id);

        if let Some(modes) = state.buckets.get_mut(&entry.game_id) {
            if let Some(regions) = modes.get_mut(&entry.mode) {
                for region in &entry.regions {
                    if let Some(bucket) = regions.get_mut(region) {
                        bucket.retain(|e| &e.request_id != request_id);
                        if bucket.is_empty() {
                            regions.remove(region);
                        }
                    }
                }
                if regions.is_empty() {
                    modes.remove(&entry.mode);
                }
            }
            if modes.is_empty() {
                state.buckets.remove(&entry.game_id);
            }
        }
        true
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.lock().users.contains_key(user_id)
    }

    pub fn contains_request(&self, user_id: &UserId, request_id: &RequestId) -> bool {
        self.lock()
            .users
            .get(user_id)
            .is_some_and(|e| &e.request_id == request_id)
    }

    /// Ordered snapshot of one bucket. Callers must not assume it stays
    /// current.
    pub fn list(&self, key: &BucketKey) -> Vec<QueuedRequest> {
        self.lock()
            .buckets
            .get(&key.game_id)
            .and_then(|modes| modes.get(&key.mode))
            .and_then(|regions| regions.get(&key.region))
            .cloned()
            .unwrap_or_default()
    }

    pub fn bucket_len(&self, key: &BucketKey) -> usize {
        self.lock()
            .buckets
            .get(&key.game_id)
            .and_then(|modes| modes.get(&key.mode))
            .and_then(|regions| regions.get(&key.region))
            .map_or(0, Vec::len)
    }

    /// Buckets a request is visible in.
    pub fn buckets_for_request(&self, request: &MatchRequest) -> Vec<BucketKey> {
        request
            .criteria
            .regions
            .iter()
            .map(|region| BucketKey {
                game_id: request.primary_game.clone(),
                mode: request.criteria.game_mode,
                region: *region,
            })
            .collect()
    }

    /// Every bucket currently holding at least `min_len` entries.
    pub fn non_empty_buckets(&self, min_len: usize) -> Vec<BucketKey> {
        let state = self.lock();
        let mut keys = Vec::new();
        for (game_id, modes) in &state.buckets {
            for (mode, regions) in modes {
                for (region, bucket) in regions {
                    if bucket.len() >= min_len {
                        keys.push(BucketKey {
                            game_id: game_id.clone(),
                            mode: *mode,
                            region: *region,
                        });
                    }
                }
            }
        }
        // Deterministic processing order across ticks.
        keys.sort_by(|a, b| {
            a.game_id
                .cmp(&b.game_id)
                .then_with(|| a.mode.cmp(&b.mode))
                .then_with(|| a.region.cmp(&b.region))
        });
        keys
    }

    /// Remove entries older than `max_age` and return them so the caller can
    /// expire the backing requests and notify owners.
    pub fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<QueuedRequest> {
        let cutoff = now - max_age;
        let expired: Vec<QueuedRequest> = {
            let state = self.lock();
            state
                .users
                .iter()
                .filter(|(_, entry)| entry.search_start_time < cutoff)
                .map(|(user_id, entry)| QueuedRequest {
                    request_id: entry.request_id,
                    user_id: *user_id,
                    search_start_time: entry.search_start_time,
                })
                .collect()
        };

        let mut removed = Vec::new();
        for entry in expired {
            if self.remove(&entry.user_id, &entry.request_id) {
                removed.push(entry);
            }
        }
        removed
    }

    /// Depth of every bucket, for the admin stats report.
    pub fn depth_report(&self) -> Vec<(BucketKey, usize)> {
        let state = self.lock();
        let mut report = Vec::new();
        for (game_id, modes) in &state.buckets {
            for (mode, regions) in modes {
                for (region, bucket) in regions {
                    report.push((
                        BucketKey {
                            game_id: game_id.clone(),
                            mode: *mode,
                            region: *region,
                        },
                        bucket.len(),
                    ));
                }
            }
        }
        report.sort_by(|a, b| b.1.cmp(&a.1));
        report
    }

    /// Number of users currently queued.
    pub fn queued_users(&self) -> usize {
        self.lock().users.len()
    }
}
