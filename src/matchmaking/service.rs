use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::GameCatalog;
use crate::domain::criteria::{FieldError, MatchCriteria};
use crate::domain::error_codes::ErrorCode;
use crate::domain::lobby::LobbyCapacity;
use crate::domain::notification::{NotificationIntent, NotificationType, Priority};
use crate::domain::request::{MatchRequest, RequestStatus};
use crate::domain::types::{GameId, RequestId, UserId};
use crate::lobby::LobbyService;
use crate::notify::NotificationService;
use crate::queue::{BucketKey, QueueError, QueueIndex, QueuedRequest, QUEUE_ENTRY_MAX_AGE_SECS};
use crate::socket::{EventBus, Room, ServerEvent};
use crate::storage::{MatchRecord, Storage};

use super::formation::{form_matches, CandidateMatch};
use super::relaxation::{effective_preferences, level_for_wait};
use super::scoring::EnrichedRequest;

/// How many matched waits feed the rolling estimate.
const WAIT_SAMPLE_WINDOW: usize = 100;
/// Seed value for the estimator before any match forms.
const WAIT_SEED_SECS: f64 = 60.0;
/// Estimate clamp bounds.
const MIN_ESTIMATE_SECS: u64 = 10;
const MAX_ESTIMATE_SECS: u64 = 30 * 60;
/// Relaxation is only evaluated for requests that waited at least this long.
const RELAXATION_FLOOR_SECS: i64 = 30;

/// Coordinator tunables. Tests shrink the tick interval.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    pub tick_interval: std::time::Duration,
    /// Buckets below this size are not processed.
    pub min_group_size: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_secs(5),
            min_group_size: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error("user already has an active match request")]
    ActiveRequestExists,
    #[error("user is not eligible for matchmaking")]
    UserIneligible,
    #[error("unknown game: {0}")]
    UnknownGame(GameId),
    #[error("game catalogue is unavailable")]
    CatalogUnavailable(#[source] anyhow::Error),
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("match request not found")]
    NotFound,
    #[error(transparent)]
    Storage(anyhow::Error),
}

impl MatchmakingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ActiveRequestExists => ErrorCode::ActiveRequestExists,
            Self::UserIneligible => ErrorCode::UserIneligible,
            Self::UnknownGame(_) => ErrorCode::InvalidGame,
            Self::CatalogUnavailable(_) => ErrorCode::ServiceUnavailable,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound => ErrorCode::NotFound,
            Self::Storage(_) => ErrorCode::InternalServerError,
        }
    }
}

impl From<anyhow::Error> for MatchmakingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
}

/// Queue-progress block returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub position: usize,
    pub potential_matches: usize,
    /// Estimated seconds until a match.
    #[serde(rename = "estimatedWaitTime")]
    pub estimated_wait_secs: u64,
    pub confidence: Confidence,
}

/// Status endpoint payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatusView {
    pub request: MatchRequest,
    pub queue_info: QueueInfo,
}

/// Admin stats payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub queues: Vec<QueueDepth>,
    pub queued_users: usize,
    pub matches: MatchStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub bucket: BucketKey,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub formed: usize,
    pub avg_wait_secs: f64,
    pub p50_wait_secs: f64,
    pub p90_wait_secs: f64,
    pub p99_wait_secs: f64,
}

/// Rolling matched-wait samples feeding the estimator.
struct WaitStats {
    recent: VecDeque<f64>,
}

impl WaitStats {
    fn new() -> Self {
        let mut recent = VecDeque::with_capacity(WAIT_SAMPLE_WINDOW);
        recent.push_back(WAIT_SEED_SECS);
        Self { recent }
    }

    fn record(&mut self, wait_secs: f64) {
        if self.recent.len() == WAIT_SAMPLE_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(wait_secs.max(0.0));
    }

    fn base(&self) -> f64 {
        let sum: f64 = self.recent.iter().sum();
        sum / self.recent.len() as f64
    }
}

/// The matchmaking coordinator (queue in, lobbies out).
pub struct MatchmakingService {
    storage: Arc<dyn Storage>,
    catalog: Arc<dyn GameCatalog>,
    queue: Arc<QueueIndex>,
    lobbies: Arc<LobbyService>,
    notifications: Arc<NotificationService>,
    bus: Arc<EventBus>,
    config: MatchmakingConfig,
    /// Tick re-entrancy guard; two ticks never overlap.
    processing: AtomicBool,
    wait_stats: Mutex<WaitStats>,
}

impl MatchmakingService {
    pub fn new(
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn GameCatalog>,
        queue: Arc<QueueIndex>,
        lobbies: Arc<LobbyService>,
        notifications: Arc<NotificationService>,
        bus: Arc<EventBus>,
        config: MatchmakingConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            queue,
            lobbies,
            notifications,
            bus,
            config,
            processing: AtomicBool::new(false),
            wait_stats: Mutex::new(WaitStats::new()),
        }
    }

    // --- public operations ------------------------------------------------

    /// Submit a new match request.
    pub async fn submit(
        &self,
        user_id: UserId,
        criteria: MatchCriteria,
    ) -> Result<MatchRequest, MatchmakingError> {
        let now = Utc::now();
        criteria
            .validate(&user_id, now)
            .map_err(MatchmakingError::Validation)?;

        let user = self
            .storage
            .get_user(&user_id)
            .await?
            .ok_or(MatchmakingError::UserIneligible)?;
        if !user.is_eligible() {
            return Err(MatchmakingError::UserIneligible);
        }

        if self.storage.active_request_for_user(&user_id).await?.is_some() {
            return Err(MatchmakingError::ActiveRequestExists);
        }

        let game_ids: Vec<GameId> = criteria.games.iter().map(|g| g.game_id.clone()).collect();
        match self.catalog.find_unknown(&game_ids).await {
            Ok(None) => {}
            Ok(Some(unknown)) => return Err(MatchmakingError::UnknownGame(unknown)),
            Err(err) => return Err(MatchmakingError::CatalogUnavailable(err)),
        }

        let request = MatchRequest::new(user_id, criteria, now).ok_or_else(|| {
            MatchmakingError::Validation(vec![FieldError::new("games", "no primary game")])
        })?;

        self.storage
            .insert_match_request(request.clone())
            .await
            .map_err(|_| MatchmakingError::ActiveRequestExists)?;

        if request.is_due(now) {
            if let Err(QueueError::DuplicateActiveRequest(_)) = self.queue.add(&request) {
                // Raced another submit into the index: roll the row back so
                // no queue residue or dangling request remains.
                let _ = self
                    .storage
                    .complete_match_request(&request.id, RequestStatus::Cancelled, None, now)
                    .await;
                return Err(MatchmakingError::ActiveRequestExists);
            }
        }

        self.emit_searching_status(&request, now);
        info!(
            request_id = %request.id,
            user_id = %user_id,
            game = %request.primary_game,
            mode = ?request.criteria.game_mode,
            scheduled = request.criteria.scheduled_time.is_some(),
            "match request submitted"
        );
        Ok(request)
    }

    /// Cancel an owned, still-searching request.
    pub async fn cancel(
        &self,
        user_id: &UserId,
        request_id: &RequestId,
    ) -> Result<MatchRequest, MatchmakingError> {
        let request = self
            .storage
            .get_match_request(request_id)
            .await?
            .filter(|r| &r.user_id == user_id)
            .ok_or(MatchmakingError::NotFound)?;
        if !request.is_searching() {
            return Err(MatchmakingError::NotFound);
        }

        let now = Utc::now();
        let updated = self
            .storage
            .complete_match_request(request_id, RequestStatus::Cancelled, None, now)
            .await?
            // Lost the race against finalize (or another cancel).
            .ok_or(MatchmakingError::NotFound)?;
        self.queue.remove(user_id, request_id);

        let search_time = updated.search_duration(now).num_seconds().max(0) as u64;
        self.bus.emit_room(
            &Room::MatchRequest(*request_id),
            &Arc::new(ServerEvent::MatchmakingStatus {
                request_id: *request_id,
                state: RequestStatus::Cancelled,
                search_time: Some(search_time),
                relaxation_level: None,
                potential_matches: None,
                estimated_time: None,
                lobby_id: None,
                participants: None,
            }),
        );
        info!(request_id = %request_id, user_id = %user_id, "match request cancelled");
        Ok(updated)
    }

    /// Current request plus queue progress, if the user has one searching.
    pub async fn status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<RequestStatusView>, MatchmakingError> {
        let Some(request) = self.storage.active_request_for_user(user_id).await? else {
            return Ok(None);
        };
        let queue_info = self.queue_info_for(&request);
        Ok(Some(RequestStatusView {
            request,
            queue_info,
        }))
    }

    /// Page over the user's (mostly terminal) request history.
    pub async fn history(
        &self,
        user_id: &UserId,
        game_id: Option<&GameId>,
        status: Option<RequestStatus>,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<MatchRequest>, usize), MatchmakingError> {
        Ok(self
            .storage
            .request_history(user_id, game_id, status, page, limit.clamp(1, 100))
            .await?)
    }

    /// Admin stats: bucket depths and matched-wait distribution.
    pub async fn stats(&self, hours: i64) -> Result<StatsReport, MatchmakingError> {
        let since = Utc::now() - chrono::Duration::hours(hours.clamp(1, 168));
        let records = self.storage.match_records_since(since).await?;

        let mut histogram: Histogram<u64> = Histogram::new(3)
            .map_err(|err| MatchmakingError::Storage(anyhow::anyhow!("histogram init: {err}")))?;
        let mut sum = 0.0;
        let mut samples = 0usize;
        for record in &records {
            for wait in &record.wait_seconds {
                sum += wait;
                samples += 1;
                let _ = histogram.record((wait.max(0.0) * 1000.0) as u64);
            }
        }
        let to_secs = |millis: u64| millis as f64 / 1000.0;
        let matches = MatchStats {
            formed: records.len(),
            avg_wait_secs: if samples > 0 { sum / samples as f64 } else { 0.0 },
            p50_wait_secs: to_secs(histogram.value_at_quantile(0.50)),
            p90_wait_secs: to_secs(histogram.value_at_quantile(0.90)),
            p99_wait_secs: to_secs(histogram.value_at_quantile(0.99)),
        };

        Ok(StatsReport {
            queues: self
                .queue
                .depth_report()
                .into_iter()
                .map(|(bucket, depth)| QueueDepth { bucket, depth })
                .collect(),
            queued_users: self.queue.queued_users(),
            matches,
            timestamp: Utc::now(),
        })
    }

    // --- worker -----------------------------------------------------------

    /// Run the periodic processor plus the event-driven single-bucket pass.
    pub async fn run(
        self: Arc<Self>,
        mut signal_rx: mpsc::UnboundedReceiver<BucketKey>,
        cancel: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            "matchmaking processor started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("matchmaking processor stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
                signal = signal_rx.recv() => {
                    if let Some(bucket) = signal {
                        self.process_signalled_bucket(bucket).await;
                    }
                }
            }
        }
    }

    /// One full processor pass. Skips if a previous pass is still running.
    pub async fn tick(&self) {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("tick skipped: previous pass still running");
            return;
        }
        if let Err(err) = self.tick_inner().await {
            // Tick errors are logged and swallowed; the next interval runs.
            error!(error = %err, "matchmaking tick failed");
        }
        self.processing.store(false, Ordering::SeqCst);
    }

    async fn tick_inner(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        self.reconcile_index(now).await?;
        self.expire_stale_entries(now).await;

        // Bucket formation pass.
        let mut used: HashSet<RequestId> = HashSet::new();
        for bucket in self.queue.non_empty_buckets(self.config.min_group_size) {
            if let Err(err) = self.process_bucket(&bucket, &mut used).await {
                // Per-bucket errors do not abort the tick for other buckets.
                error!(bucket = %bucket, error = %err, "bucket processing failed");
            }
        }

        // Relaxation is evaluated after formation, once per tick.
        self.relaxation_pass(now, &mut used).await?;
        Ok(())
    }

    /// Insert due requests that are missing from the index: scheduled
    /// requests whose time arrived, and (after a restart) every persisted
    /// `searching` request.
    async fn reconcile_index(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        for request in self.storage.list_searching_requests().await? {
            if request.is_due(now) && !self.queue.contains_user(&request.user_id) {
                match self.queue.add(&request) {
                    Ok(()) => {
                        debug!(request_id = %request.id, "request entered the queue index");
                    }
                    Err(err) => {
                        warn!(request_id = %request.id, error = %err,
                            "failed to reconcile request into the queue index");
                    }
                }
            }
        }
        Ok(())
    }

    /// Expire entries older than the queue ceiling.
    async fn expire_stale_entries(&self, now: DateTime<Utc>) {
        let expired = self.queue.sweep(
            chrono::Duration::seconds(QUEUE_ENTRY_MAX_AGE_SECS),
            now,
        );
        for entry in expired {
            match self
                .storage
                .complete_match_request(&entry.request_id, RequestStatus::Expired, None, now)
                .await
            {
                Ok(Some(request)) => {
                    let search_time = request.search_duration(now).num_seconds().max(0) as u64;
                    self.bus.emit_room(
                        &Room::MatchRequest(entry.request_id),
                        &Arc::new(ServerEvent::MatchmakingStatus {
                            request_id: entry.request_id,
                            state: RequestStatus::Expired,
                            search_time: Some(search_time),
                            relaxation_level: None,
                            potential_matches: None,
                            estimated_time: None,
                            lobby_id: None,
                            participants: None,
                        }),
                    );
                    info!(request_id = %entry.request_id, "match request expired");
                }
                Ok(None) => {}
                Err(err) => {
                    error!(request_id = %entry.request_id, error = %err,
                        "failed to expire request");
                }
            }
        }
    }

    /// Event-driven pass over the single bucket that received a request.
    async fn process_signalled_bucket(&self, bucket: BucketKey) {
        if self.processing.swap(true, Ordering::SeqCst) {
            // A full tick is running; it will see the new entry anyway.
            return;
        }
        if self.queue.bucket_len(&bucket) >= self.config.min_group_size {
            let mut used = HashSet::new();
            if let Err(err) = self.process_bucket(&bucket, &mut used).await {
                error!(bucket = %bucket, error = %err, "signalled bucket processing failed");
            }
        }
        self.processing.store(false, Ordering::SeqCst);
    }

    async fn process_bucket(
        &self,
        bucket: &BucketKey,
        used: &mut HashSet<RequestId>,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let snapshot = self.queue.list(bucket);
        let enriched = self.enrich(bucket, &snapshot, used, now).await?;
        if enriched.len() < self.config.min_group_size.max(1) {
            return Ok(());
        }

        for candidate in form_matches(bucket, &enriched, now) {
            // Whatever happens during finalize, these requests are spoken
            // for until the next tick.
            for participant in &candidate.participants {
                used.insert(participant.request_id);
            }
            self.finalize(candidate, now).await;
        }
        Ok(())
    }

    /// Join queue refs with their requests and owners, dropping anything no
    /// longer searching.
    async fn enrich(
        &self,
        bucket: &BucketKey,
        snapshot: &[QueuedRequest],
        used: &HashSet<RequestId>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<EnrichedRequest>> {
        let mut enriched = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            if used.contains(&entry.request_id) {
                continue;
            }
            let Some(request) = self.storage.get_match_request(&entry.request_id).await? else {
                continue;
            };
            if !request.is_searching() || !request.is_due(now) {
                continue;
            }
            let Some(user) = self.storage.get_user(&request.user_id).await? else {
                continue;
            };
            enriched.push(EnrichedRequest {
                request_id: request.id,
                user_id: request.user_id,
                game_mode: request.criteria.game_mode,
                regions: request.criteria.regions.clone(),
                languages: request.criteria.languages.clone(),
                effective: effective_preferences(&request.criteria, request.relaxation_level),
                skill_preference: request.criteria.skill_preference,
                skill_level: f64::from(user.skill_for(&bucket.game_id)),
                karma: f64::from(user.karma),
                group_size: request.criteria.group_size,
                search_start_time: request.search_start_time,
                preselected_users: request.criteria.preselected_users.clone(),
            });
        }
        Ok(enriched)
    }

    /// Convert a candidate match into a lobby, atomically with respect to
    /// its participants' requests.
    async fn finalize(&self, candidate: CandidateMatch, now: DateTime<Utc>) {
        let request_ids: Vec<RequestId> = candidate
            .participants
            .iter()
            .map(|p| p.request_id)
            .collect();
        let participant_users: Vec<UserId> =
            candidate.participants.iter().map(|p| p.user_id).collect();
        let host = candidate
            .participants
            .iter()
            .find(|p| p.request_id == candidate.seed)
            .map_or(participant_users[0], |p| p.user_id);

        // Step 1: create the lobby.
        let lobby = match self
            .lobbies
            .create_for_match(
                candidate.bucket.game_id.clone(),
                candidate.bucket.mode,
                candidate.bucket.region,
                host,
                &participant_users,
                LobbyCapacity {
                    min: candidate.capacity.min,
                    max: candidate.capacity.max,
                },
            )
            .await
        {
            Ok(lobby) => lobby,
            Err(err) => {
                error!(error = %err, "failed to create lobby for match; participants stay queued");
                return;
            }
        };

        // Step 2: flip every request, all or nothing.
        let flipped = match self
            .storage
            .complete_match_requests(&request_ids, lobby.id, now)
            .await
        {
            Ok(Some(flipped)) => flipped,
            Ok(None) => {
                // Someone cancelled mid-tick: compensate by closing the
                // just-created lobby; the remaining participants stay
                // searching and their queue entries stay put.
                warn!(lobby_id = %lobby.id, "match aborted: participant left searching state");
                if let Err(err) = self.lobbies.close(&lobby.id, &host, true).await {
                    error!(lobby_id = %lobby.id, error = %err,
                        "failed to close lobby after aborted match");
                }
                return;
            }
            Err(err) => {
                error!(lobby_id = %lobby.id, error = %err, "failed to persist match; compensating");
                if let Err(close_err) = self.lobbies.close(&lobby.id, &host, true).await {
                    error!(lobby_id = %lobby.id, error = %close_err,
                        "failed to close lobby after persistence failure");
                }
                return;
            }
        };

        // Matched requests leave the index.
        for request in &flipped {
            self.queue.remove(&request.user_id, &request.id);
        }

        // Step 3: terminal status to each matchrequest room.
        for request in &flipped {
            self.bus.emit_room(
                &Room::MatchRequest(request.id),
                &Arc::new(ServerEvent::MatchmakingStatus {
                    request_id: request.id,
                    state: RequestStatus::Matched,
                    search_time: Some(
                        request.search_duration(now).num_seconds().max(0) as u64
                    ),
                    relaxation_level: None,
                    potential_matches: None,
                    estimated_time: None,
                    lobby_id: Some(lobby.id),
                    participants: Some(participant_users.clone()),
                }),
            );
        }

        // Step 4: pre-join user sockets to the lobby room and announce it.
        let created = Arc::new(ServerEvent::LobbyCreated { lobby_id: lobby.id });
        for user_id in &participant_users {
            self.bus.join_user(user_id, Room::Lobby(lobby.id));
            self.bus.emit_user(user_id, &created);
        }

        // Step 5: match-found notifications; failures never abort a formed
        // match.
        for user_id in &participant_users {
            let intent = NotificationIntent {
                kind: NotificationType::MatchFound,
                title: "Match found".to_string(),
                body: format!("Your {} lobby is forming", lobby.game_id),
                priority: Priority::High,
                data: serde_json::json!({ "lobbyId": lobby.id }),
                expires_at: None,
            };
            if let Err(err) = self.notifications.create(*user_id, intent).await {
                error!(user_id = %user_id, error = %err, "match-found notification failed");
            }
        }

        // Bookkeeping: history row and wait samples.
        let wait_seconds: Vec<f64> = flipped
            .iter()
            .map(|r| r.search_duration(now).num_milliseconds().max(0) as f64 / 1000.0)
            .collect();
        let mean_wait = wait_seconds.iter().sum::<f64>() / wait_seconds.len().max(1) as f64;
        if let Ok(mut stats) = self.wait_stats.lock() {
            stats.record(mean_wait);
        }
        let record = MatchRecord {
            id: uuid::Uuid::new_v4(),
            game_id: candidate.bucket.game_id.clone(),
            game_mode: candidate.bucket.mode,
            region: candidate.bucket.region,
            participants: participant_users.clone(),
            lobby_id: lobby.id,
            group_score: candidate.group_score,
            wait_seconds,
            formed_at: now,
        };
        if let Err(err) = self.storage.insert_match_record(record).await {
            error!(lobby_id = %lobby.id, error = %err, "failed to record match history");
        }

        info!(
            lobby_id = %lobby.id,
            bucket = %candidate.bucket,
            participants = participant_users.len(),
            score = candidate.group_score,
            "match finalized"
        );
    }

    /// Per-tick relaxation pass, evaluated after formation.
    async fn relaxation_pass(
        &self,
        now: DateTime<Utc>,
        used: &mut HashSet<RequestId>,
    ) -> anyhow::Result<()> {
        for request in self.storage.list_searching_requests().await? {
            if used.contains(&request.id) || !request.is_due(now) {
                continue;
            }
            let wait = request.search_duration(now);
            if wait.num_seconds() < RELAXATION_FLOOR_SECS {
                continue;
            }
            let target = level_for_wait(wait);
            if target <= request.relaxation_level {
                continue;
            }
            if !self.storage.advance_relaxation(&request.id, target).await? {
                continue;
            }
            debug!(
                request_id = %request.id,
                level = target,
                wait_secs = wait.num_seconds(),
                "criteria relaxed"
            );
            self.emit_relaxed_status(&request, target, now);

            // A widened request gets an immediate shot at its own buckets.
            for bucket in self.queue.buckets_for_request(&request) {
                if self.queue.bucket_len(&bucket) >= self.config.min_group_size {
                    if let Err(err) = self.process_bucket(&bucket, used).await {
                        error!(bucket = %bucket, error = %err,
                            "post-relaxation bucket processing failed");
                    }
                }
            }
        }
        Ok(())
    }

    // --- helpers ----------------------------------------------------------

    fn primary_bucket(request: &MatchRequest) -> Option<BucketKey> {
        request.criteria.regions.first().map(|region| BucketKey {
            game_id: request.primary_game.clone(),
            mode: request.criteria.game_mode,
            region: *region,
        })
    }

    fn queue_info_for(&self, request: &MatchRequest) -> QueueInfo {
        let (queue_size, position) = match Self::primary_bucket(request) {
            Some(bucket) => {
                let snapshot = self.queue.list(&bucket);
                let position = snapshot
                    .iter()
                    .position(|e| e.request_id == request.id)
                    .map_or(0, |i| i + 1);
                (snapshot.len(), position)
            }
            None => (0, 0),
        };
        let (estimated_wait_secs, confidence) = self.estimate_wait(queue_size);
        QueueInfo {
            position,
            potential_matches: queue_size.saturating_sub(1),
            estimated_wait_secs,
            confidence,
        }
    }

    /// Wait estimate from the rolling matched-wait average.
    fn estimate_wait(&self, queue_size: usize) -> (u64, Confidence) {
        let base = self
            .wait_stats
            .lock()
            .map(|s| s.base())
            .unwrap_or(WAIT_SEED_SECS);
        let min_group = self.config.min_group_size.max(1) as f64;
        let estimate = if queue_size >= self.config.min_group_size {
            base / min_group
        } else if queue_size > 0 {
            base * (min_group - queue_size as f64)
        } else {
            base * min_group
        };
        let clamped = (estimate.round() as u64).clamp(MIN_ESTIMATE_SECS, MAX_ESTIMATE_SECS);
        let confidence = if queue_size >= self.config.min_group_size {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        (clamped, confidence)
    }

    fn emit_searching_status(&self, request: &MatchRequest, now: DateTime<Utc>) {
        let queue_info = self.queue_info_for(request);
        self.bus.emit_room(
            &Room::MatchRequest(request.id),
            &Arc::new(ServerEvent::MatchmakingStatus {
                request_id: request.id,
                state: RequestStatus::Searching,
                search_time: Some(request.search_duration(now).num_seconds().max(0) as u64),
                relaxation_level: Some(request.relaxation_level),
                potential_matches: Some(queue_info.potential_matches),
                estimated_time: Some(queue_info.estimated_wait_secs),
                lobby_id: None,
                participants: None,
            }),
        );
    }

    fn emit_relaxed_status(&self, request: &MatchRequest, level: u8, now: DateTime<Utc>) {
        self.bus.emit_room(
            &Room::MatchRequest(request.id),
            &Arc::new(ServerEvent::MatchmakingStatus {
                request_id: request.id,
                state: RequestStatus::Searching,
                search_time: Some(request.search_duration(now).num_seconds().max(0) as u64),
                relaxation_level: Some(level),
                potential_matches: None,
                estimated_time: None,
                lobby_id: None,
                participants: None,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticGameCatalog;
    use crate::chat::ChatService;
    use crate::domain::criteria::{
        GameMode, GameSelection, GroupSize, PreferenceStrength, Region, SkillPreference,
    };
    use crate::domain::user::{User, UserRole, UserStatus};
    use crate::lobby::LobbyServiceConfig;
    use crate::storage::MemoryStorage;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct Harness {
        service: Arc<MatchmakingService>,
        storage: Arc<MemoryStorage>,
        queue: Arc<QueueIndex>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let bus = Arc::new(EventBus::new());
        let catalog = Arc::new(StaticGameCatalog::with_games(["rocket-rumble"]));
        let (queue, _signal_rx) = QueueIndex::new();
        let queue = Arc::new(queue);
        let chat = Arc::new(ChatService::new(storage.clone(), bus.clone()));
        let lobbies = Arc::new(LobbyService::new(
            storage.clone(),
            chat,
            bus.clone(),
            LobbyServiceConfig::default(),
        ));
        let (push_tx, _push_rx) = mpsc::channel(64);
        let (email_tx, _email_rx) = mpsc::channel(64);
        let notifications = Arc::new(NotificationService::new(
            storage.clone(),
            bus.clone(),
            push_tx,
            email_tx,
        ));
        let service = Arc::new(MatchmakingService::new(
            storage.clone(),
            catalog,
            queue.clone(),
            lobbies,
            notifications,
            bus,
            MatchmakingConfig {
                tick_interval: std::time::Duration::from_millis(50),
                min_group_size: 2,
            },
        ));
        Harness {
            service,
            storage,
            queue,
        }
    }

    async fn seed_user(storage: &Arc<MemoryStorage>, status: UserStatus) -> UserId {
        let user = User {
            id: Uuid::new_v4(),
            display_name: "tester".into(),
            status,
            role: UserRole::Player,
            karma: 80,
            game_skills: HashMap::from([("rocket-rumble".to_string(), 50)]),
            notification_preferences: Default::default(),
            created_at: Utc::now(),
        };
        let id = user.id;
        storage.upsert_user(user).await.unwrap();
        id
    }

    fn criteria() -> MatchCriteria {
        MatchCriteria {
            games: vec![GameSelection {
                game_id: "rocket-rumble".into(),
                weight: 5,
            }],
            game_mode: GameMode::Competitive,
            regions: vec![Region::Na],
            region_preference: PreferenceStrength::Preferred,
            languages: Vec::new(),
            language_preference: PreferenceStrength::Any,
            skill_preference: SkillPreference::Similar,
            group_size: GroupSize { min: 2, max: 2 },
            scheduled_time: None,
            preselected_users: Vec::new(),
        }
    }

    #[tokio::test]
    async fn submit_rejects_ineligible_and_unknown_game() {
        let h = harness();
        let suspended = seed_user(&h.storage, UserStatus::Suspended).await;
        assert!(matches!(
            h.service.submit(suspended, criteria()).await,
            Err(MatchmakingError::UserIneligible)
        ));

        let user = seed_user(&h.storage, UserStatus::Active).await;
        let mut bad = criteria();
        bad.games[0].game_id = "not-a-game".into();
        assert!(matches!(
            h.service.submit(user, bad).await,
            Err(MatchmakingError::UnknownGame(g)) if g == "not-a-game"
        ));
    }

    #[tokio::test]
    async fn submit_enforces_one_active_request() {
        let h = harness();
        let user = seed_user(&h.storage, UserStatus::Active).await;
        let first = h.service.submit(user, criteria()).await.unwrap();
        assert!(h.queue.contains_request(&user, &first.id));

        assert!(matches!(
            h.service.submit(user, criteria()).await,
            Err(MatchmakingError::ActiveRequestExists)
        ));

        // After cancelling, a new submission is accepted under a new id.
        h.service.cancel(&user, &first.id).await.unwrap();
        let second = h.service.submit(user, criteria()).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn cancel_requires_ownership_and_searching() {
        let h = harness();
        let owner = seed_user(&h.storage, UserStatus::Active).await;
        let stranger = seed_user(&h.storage, UserStatus::Active).await;
        let request = h.service.submit(owner, criteria()).await.unwrap();

        assert!(matches!(
            h.service.cancel(&stranger, &request.id).await,
            Err(MatchmakingError::NotFound)
        ));

        let cancelled = h.service.cancel(&owner, &request.id).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(!h.queue.contains_user(&owner));

        // A second cancel of the (now terminal) request 404s.
        assert!(matches!(
            h.service.cancel(&owner, &request.id).await,
            Err(MatchmakingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn status_reports_queue_progress() {
        let h = harness();
        let user = seed_user(&h.storage, UserStatus::Active).await;
        assert!(h.service.status(&user).await.unwrap().is_none());

        h.service.submit(user, criteria()).await.unwrap();
        let other = seed_user(&h.storage, UserStatus::Active).await;
        let mut other_criteria = criteria();
        // A different mode keeps them from matching during this test.
        other_criteria.game_mode = GameMode::Casual;
        h.service.submit(other, other_criteria).await.unwrap();

        let view = h.service.status(&user).await.unwrap().unwrap();
        assert_eq!(view.queue_info.position, 1);
        // Different modes are different buckets.
        assert_eq!(view.queue_info.potential_matches, 0);
        assert_eq!(view.queue_info.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn scheduled_requests_stay_out_of_the_index_until_due() {
        let h = harness();
        let user = seed_user(&h.storage, UserStatus::Active).await;
        let mut c = criteria();
        c.scheduled_time = Some(Utc::now() + chrono::Duration::hours(1));
        let request = h.service.submit(user, c).await.unwrap();

        assert!(!h.queue.contains_user(&user), "future request not queued");
        // The tick reconciler leaves it out as well while not due.
        h.service.tick().await;
        assert!(!h.queue.contains_user(&user));
        // But the row is searching, pinned to its scheduled start.
        let row = h.storage.get_match_request(&request.id).await.unwrap().unwrap();
        assert!(row.is_searching());
        assert_eq!(row.search_start_time, request.search_start_time);
    }

    #[tokio::test]
    async fn wait_estimate_follows_the_queue_size_formula() {
        let h = harness();
        // Seed base is 60s, min group 2.
        let (full, conf_full) = h.service.estimate_wait(2);
        assert_eq!(full, 30);
        assert_eq!(conf_full, Confidence::Medium);

        let (short, conf_short) = h.service.estimate_wait(1);
        assert_eq!(short, 60);
        assert_eq!(conf_short, Confidence::Low);

        let (empty, conf_empty) = h.service.estimate_wait(0);
        assert_eq!(empty, 120);
        assert_eq!(conf_empty, Confidence::Low);
    }

    #[tokio::test]
    async fn wait_estimate_clamps_to_bounds() {
        let h = harness();
        if let Ok(mut stats) = h.service.wait_stats.lock() {
            for _ in 0..WAIT_SAMPLE_WINDOW {
                stats.record(10_000.0);
            }
        }
        let (clamped, _) = h.service.estimate_wait(0);
        assert_eq!(clamped, MAX_ESTIMATE_SECS);

        if let Ok(mut stats) = h.service.wait_stats.lock() {
            for _ in 0..WAIT_SAMPLE_WINDOW {
                stats.record(1.0);
            }
        }
        let (floor, _) = h.service.estimate_wait(2);
        assert_eq!(floor, MIN_ESTIMATE_SECS);
    }

    #[tokio::test]
    async fn tick_guard_prevents_overlap() {
        let h = harness();
        h.service.processing.store(true, Ordering::SeqCst);
        // With the guard held, tick returns immediately without touching
        // anything (nothing to assert beyond not hanging).
        h.service.tick().await;
        assert!(h.service.processing.load(Ordering::SeqCst));
        h.service.processing.store(false, Ordering::SeqCst);
    }
}
