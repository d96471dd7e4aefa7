use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{GameCatalog, StaticGameCatalog};
use crate::chat::ChatService;
use crate::config::Config;
use crate::http::auth::TokenVerifier;
use crate::lobby::{LobbyService, LobbyServiceConfig};
use crate::matchmaking::service::MatchmakingConfig as ServiceMatchmakingConfig;
use crate::matchmaking::MatchmakingService;
use crate::notify::{
    spawn_email_worker, spawn_push_worker, BatchConfig, EmailJob, EmailTransport,
    LogEmailTransport, LogPushTransport, NotificationService, PushJob, PushTransport,
};
use crate::queue::{BucketKey, QueueIndex};
use crate::socket::EventBus;
use crate::storage::Storage;

/// Inputs consumed once when the workers spawn.
struct WorkerInputs {
    signal_rx: mpsc::UnboundedReceiver<BucketKey>,
    push_rx: mpsc::Receiver<PushJob>,
    email_rx: mpsc::Receiver<EmailJob>,
}

/// The composed application: every component built and wired at startup,
/// no global singletons. Lifecycle is explicit: `new` -> `spawn_workers` ->
/// `shutdown`.
pub struct App {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub catalog: Arc<dyn GameCatalog>,
    pub queue: Arc<QueueIndex>,
    pub bus: Arc<EventBus>,
    pub matchmaking: Arc<MatchmakingService>,
    pub lobbies: Arc<LobbyService>,
    pub chat: Arc<ChatService>,
    pub notifications: Arc<NotificationService>,
    pub verifier: TokenVerifier,
    shutdown: CancellationToken,
    worker_inputs: Mutex<Option<WorkerInputs>>,
}

impl App {
    /// Build and wire every component. The queue index is reconstructed
    /// from persisted `searching` requests before the first tick.
    pub async fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn GameCatalog>,
    ) -> Result<Arc<Self>> {
        storage
            .initialize()
            .await
            .context("storage initialization failed")?;

        let bus = Arc::new(EventBus::new());
        let (queue, signal_rx) = QueueIndex::new();
        let queue = Arc::new(queue);

        let (push_tx, push_rx) = mpsc::channel(config.notifications.queue_capacity);
        let (email_tx, email_rx) = mpsc::channel(config.notifications.queue_capacity);

        let chat = Arc::new(ChatService::new(storage.clone(), bus.clone()));
        let notifications = Arc::new(NotificationService::new(
            storage.clone(),
            bus.clone(),
            push_tx,
            email_tx,
        ));
        let lobbies = Arc::new(LobbyService::new(
            storage.clone(),
            chat.clone(),
            bus.clone(),
            LobbyServiceConfig {
                auto_start_delay: std::time::Duration::from_secs(
                    config.lobby.auto_start_delay_secs,
                ),
                history_window: chrono::Duration::hours(config.lobby.history_window_hours),
            },
        ));
        let matchmaking = Arc::new(MatchmakingService::new(
            storage.clone(),
            catalog.clone(),
            queue.clone(),
            lobbies.clone(),
            notifications.clone(),
            bus.clone(),
            ServiceMatchmakingConfig {
                tick_interval: std::time::Duration::from_secs(
                    config.matchmaking.tick_interval_secs,
                ),
                min_group_size: config.matchmaking.min_group_size,
            },
        ));

        let verifier = match &config.security.auth_secret {
            Some(secret) => TokenVerifier::new(secret),
            None => {
                let generated = uuid::Uuid::new_v4().to_string();
                warn!("no auth secret configured; using a process-local development secret");
                TokenVerifier::new(&generated)
            }
        };

        let app = Arc::new(Self {
            config,
            storage,
            catalog,
            queue,
            bus,
            matchmaking,
            lobbies,
            chat,
            notifications,
            verifier,
            shutdown: CancellationToken::new(),
            worker_inputs: Mutex::new(Some(WorkerInputs {
                signal_rx,
                push_rx,
                email_rx,
            })),
        });

        app.rebuild_queue_index().await?;
        Ok(app)
    }

    /// Convenience constructor with the in-memory storage and the
    /// config-seeded catalogue.
    pub async fn from_config(config: Config) -> Result<Arc<Self>> {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::MemoryStorage::new());
        let catalog: Arc<dyn GameCatalog> = Arc::new(StaticGameCatalog::with_games(
            config.catalog.games.iter().cloned(),
        ));
        Self::new(config, storage, catalog).await
    }

    /// Requeue every due `searching` request after a restart.
    async fn rebuild_queue_index(&self) -> Result<()> {
        let now = Utc::now();
        let mut restored = 0usize;
        for request in self.storage.list_searching_requests().await? {
            if request.is_due(now) {
                match self.queue.add(&request) {
                    Ok(()) => restored += 1,
                    Err(err) => {
                        warn!(request_id = %request.id, error = %err,
                            "failed to restore request into the queue index");
                    }
                }
            }
        }
        if restored > 0 {
            info!(restored, "queue index rebuilt from storage");
        }
        Ok(())
    }

    /// Spawn the matchmaking processor, delivery dispatchers, and the daily
    /// notification sweep with the default (logging) transports.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.spawn_workers_with(Arc::new(LogPushTransport), Arc::new(LogEmailTransport))
    }

    /// Spawn workers with explicit delivery transports.
    pub fn spawn_workers_with(
        self: &Arc<Self>,
        push_transport: Arc<dyn PushTransport>,
        email_transport: Arc<dyn EmailTransport>,
    ) -> Vec<JoinHandle<()>> {
        let Some(inputs) = self.worker_inputs.lock().ok().and_then(|mut i| i.take()) else {
            warn!("workers already spawned; ignoring duplicate call");
            return Vec::new();
        };

        let mut handles = Vec::new();

        handles.push(tokio::spawn(
            self.matchmaking
                .clone()
                .run(inputs.signal_rx, self.shutdown.clone()),
        ));

        handles.push(spawn_push_worker(
            inputs.push_rx,
            push_transport,
            self.storage.clone(),
            BatchConfig {
                batch_size: self.config.notifications.push_batch_size,
                flush_interval: std::time::Duration::from_secs(
                    self.config.notifications.push_flush_secs,
                ),
            },
            self.shutdown.clone(),
        ));
        handles.push(spawn_email_worker(
            inputs.email_rx,
            email_transport,
            self.storage.clone(),
            BatchConfig {
                batch_size: self.config.notifications.email_batch_size,
                flush_interval: std::time::Duration::from_secs(
                    self.config.notifications.email_flush_secs,
                ),
            },
            self.shutdown.clone(),
        ));

        // Daily retention sweep.
        let sweep_days = self.config.notifications.sweep_days;
        let notifications = self.notifications.clone();
        let cancel = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        match notifications.sweep(sweep_days).await {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "notification sweep completed"),
                            Err(err) => warn!(error = %err, "notification sweep failed"),
                        }
                    }
                }
            }
        }));

        info!(workers = handles.len(), "background workers started");
        handles
    }

    /// Begin shutdown: stop workers and cancel lobby timers. HTTP draining
    /// is the binary's concern.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.lobbies.shutdown();
        info!("application shutdown initiated");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
