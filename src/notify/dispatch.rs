use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::notification::{Channel, DeliveryState};
use crate::domain::types::{NotificationId, UserId};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::storage::Storage;

/// A queued push delivery.
#[derive(Debug, Clone)]
pub struct PushJob {
    pub notification_id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub body: String,
}

/// A queued email delivery.
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub notification_id: NotificationId,
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
}

/// Outbound push transport. The core emits intents; the adapter ships them.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_batch(&self, jobs: &[PushJob]) -> Result<()>;
}

/// Outbound email transport.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_batch(&self, jobs: &[EmailJob]) -> Result<()>;
}

/// Default adapter: records the intent in the log and succeeds.
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send_batch(&self, jobs: &[PushJob]) -> Result<()> {
        for job in jobs {
            info!(
                notification_id = %job.notification_id,
                user_id = %job.user_id,
                title = %job.title,
                "push intent emitted"
            );
        }
        Ok(())
    }
}

/// Default adapter: records the intent in the log and succeeds.
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send_batch(&self, jobs: &[EmailJob]) -> Result<()> {
        for job in jobs {
            info!(
                notification_id = %job.notification_id,
                user_id = %job.user_id,
                subject = %job.subject,
                "email intent emitted"
            );
        }
        Ok(())
    }
}

/// Batching parameters for one dispatch worker.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// Spawn the push dispatch worker.
pub fn spawn_push_worker(
    rx: mpsc::Receiver<PushJob>,
    transport: Arc<dyn PushTransport>,
    storage: Arc<dyn Storage>,
    batch: BatchConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        push_loop(rx, transport, storage, batch, cancel).await;
    })
}

/// Spawn the email dispatch worker.
pub fn spawn_email_worker(
    rx: mpsc::Receiver<EmailJob>,
    transport: Arc<dyn EmailTransport>,
    storage: Arc<dyn Storage>,
    batch: BatchConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        email_loop(rx, transport, storage, batch, cancel).await;
    })
}

async fn push_loop(
    mut rx: mpsc::Receiver<PushJob>,
    transport: Arc<dyn PushTransport>,
    storage: Arc<dyn Storage>,
    batch: BatchConfig,
    cancel: CancellationToken,
) {
    let executor = RetryExecutor::new(RetryConfig::push_delivery());
    let mut buffer: Vec<PushJob> = Vec::with_capacity(batch.batch_size);
    let mut flush_timer = tokio::time::interval(batch.flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let mut flush = false;
        let mut shutdown = false;
        tokio::select! {
            () = cancel.cancelled() => { shutdown = true; flush = true; }
            job = rx.recv() => match job {
                Some(job) => {
                    buffer.push(job);
                    if buffer.len() >= batch.batch_size { flush = true; }
                }
                None => { shutdown = true; flush = true; }
            },
            _ = flush_timer.tick() => {
                if !buffer.is_empty() { flush = true; }
            }
        }

        if flush && !buffer.is_empty() {
            let jobs = std::mem::take(&mut buffer);
            flush_push_batch(&executor, &transport, &storage, jobs).await;
        }
        if shutdown {
            debug!("push dispatch worker stopped");
            return;
        }
    }
}

async fn flush_push_batch(
    executor: &RetryExecutor,
    transport: &Arc<dyn PushTransport>,
    storage: &Arc<dyn Storage>,
    jobs: Vec<PushJob>,
) {
    let outcome = executor
        .execute("push_delivery", || transport.send_batch(&jobs))
        .await;
    let state = match outcome {
        Ok(()) => DeliveryState::Delivered,
        Err(err) => {
            error!(error = %err, batch_len = jobs.len(), "push delivery failed after retries");
            DeliveryState::Failed
        }
    };
    for job in &jobs {
        if let Err(err) = storage
            .set_delivery_state(&job.notification_id, Channel::Push, state)
            .await
        {
            error!(notification_id = %job.notification_id, error = %err,
                "failed to record push delivery state");
        }
    }
}

async fn email_loop(
    mut rx: mpsc::Receiver<EmailJob>,
    transport: Arc<dyn EmailTransport>,
    storage: Arc<dyn Storage>,
    batch: BatchConfig,
    cancel: CancellationToken,
) {
    let executor = RetryExecutor::new(RetryConfig::email_delivery());
    let mut buffer: Vec<EmailJob> = Vec::with_capacity(batch.batch_size);
    let mut flush_timer = tokio::time::interval(batch.flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let mut flush = false;
        let mut shutdown = false;
        tokio::select! {
            () = cancel.cancelled() => { shutdown = true; flush = true; }
            job = rx.recv() => match job {
                Some(job) => {
                    buffer.push(job);
                    if buffer.len() >= batch.batch_size { flush = true; }
                }
                None => { shutdown = true; flush = true; }
            },
            _ = flush_timer.tick() => {
                if !buffer.is_empty() { flush = true; }
            }
        }

        if flush && !buffer.is_empty() {
            let jobs = std::mem::take(&mut buffer);
            flush_email_batch(&executor, &transport, &storage, jobs).await;
        }
        if shutdown {
            debug!("email dispatch worker stopped");
            return;
        }
    }
}

async fn flush_email_batch(
    executor: &RetryExecutor,
    transport: &Arc<dyn EmailTransport>,
    storage: &Arc<dyn Storage>,
    jobs: Vec<EmailJob>,
) {
    let outcome = executor
        .execute("email_delivery", || transport.send_batch(&jobs))
        .await;
    let state = match outcome {
        Ok(()) => DeliveryState::Delivered,
        Err(err) => {
            error!(error = %err, batch_len = jobs.len(), "email delivery failed after retries");
            DeliveryState::Failed
        }
    };
    for job in &jobs {
        if let Err(err) = storage
            .set_delivery_state(&job.notification_id, Channel::Email, state)
            .await
        {
            error!(notification_id = %job.notification_id, error = %err,
                "failed to record email delivery state");
        }
    }
}
