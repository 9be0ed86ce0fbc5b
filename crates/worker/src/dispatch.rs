//! Bounded notification dispatch
//!
//! The scanner hands batches to a [`NotificationSink`] and moves on; delivery
//! happens in the background. [`NotificationDispatcher`] is the production sink:
//! a bounded queue feeding a loop that runs at most `max_concurrency` jobs at a
//! time. When the queue is full, `dispatch` waits, which slows the scanner down
//! instead of piling up tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use eventhook_core::models::{Event, WebhookEventType};
use eventhook_core::telemetry::notification_job_span;

use crate::notifier::WebhookNotifier;

/// One batch waiting to be notified
#[derive(Debug, Clone)]
pub struct NotificationJob {
    /// Scan cycle that produced the job
    pub cycle_id: Uuid,
    pub kind: WebhookEventType,
    pub user_id: String,
    pub events: Vec<Event>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Dispatcher no longer accepts jobs
    #[error("dispatcher is closed")]
    Closed,

    #[error("graceful shutdown timed out with {in_flight} job(s) in flight")]
    ShutdownTimeout { in_flight: usize },
}

/// Where the scanner sends batches
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Hand a job over. Returns once the job is accepted, not once it is delivered.
    async fn dispatch(&self, job: NotificationJob) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Jobs notified at the same time
    pub max_concurrency: usize,
    /// Jobs that may wait in the queue
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            queue_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStatus {
    /// Accepting jobs
    Running,
    /// Queue closed, finishing what was accepted
    Draining,
    Stopped,
}

pub struct NotificationDispatcher {
    config: DispatcherConfig,
    sender: Mutex<Option<mpsc::Sender<NotificationJob>>>,
    status: RwLock<DispatcherStatus>,
    permits: Arc<Semaphore>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Spawn the dispatch loop. Must be called inside a tokio runtime.
    pub fn start(notifier: Arc<WebhookNotifier>, config: DispatcherConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        info!(
            max_concurrency = config.max_concurrency,
            queue_capacity = config.queue_capacity,
            "Starting notification dispatcher"
        );

        let handle = tokio::spawn(dispatch_loop(notifier, receiver, Arc::clone(&permits)));

        Self {
            config,
            sender: Mutex::new(Some(sender)),
            status: RwLock::new(DispatcherStatus::Running),
            permits,
            loop_handle: Mutex::new(Some(handle)),
        }
    }

    pub fn status(&self) -> DispatcherStatus {
        *self.status.read()
    }

    /// Jobs currently being notified
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrency
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    /// Stop accepting jobs and wait for accepted ones to finish
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        if self.status() == DispatcherStatus::Stopped {
            return Ok(());
        }

        info!("Draining notification dispatcher");
        *self.status.write() = DispatcherStatus::Draining;

        // Dropping the last sender closes the queue; the loop exits once it is empty
        self.sender.lock().take();

        let handle = self.loop_handle.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Dispatch loop drained"),
                Ok(Err(e)) => error!(error = %e, "Dispatch loop panicked"),
                Err(_) => {
                    let in_flight = self.in_flight();
                    warn!(in_flight, "Shutdown timeout reached, aborting pending notifications");
                    handle.abort();
                    *self.status.write() = DispatcherStatus::Stopped;
                    return Err(DispatchError::ShutdownTimeout { in_flight });
                }
            }
        }

        *self.status.write() = DispatcherStatus::Stopped;
        info!("Notification dispatcher stopped");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for NotificationDispatcher {
    async fn dispatch(&self, job: NotificationJob) -> Result<(), DispatchError> {
        let sender = self.sender.lock().clone().ok_or(DispatchError::Closed)?;
        debug!(
            cycle_id = %job.cycle_id,
            user_id = %job.user_id,
            kind = %job.kind,
            events = job.events.len(),
            "Queueing notification"
        );
        sender.send(job).await.map_err(|_| DispatchError::Closed)
    }
}

async fn dispatch_loop(
    notifier: Arc<WebhookNotifier>,
    mut receiver: mpsc::Receiver<NotificationJob>,
    permits: Arc<Semaphore>,
) {
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        // Reap finished jobs so the set does not grow for the lifetime of the process
        while running.try_join_next().is_some() {}

        let notifier = Arc::clone(&notifier);
        let span = notification_job_span(job.cycle_id, job.kind, &job.user_id);
        running.spawn(
            async move {
                run_job(&notifier, job).await;
                drop(permit);
            }
            .instrument(span),
        );
    }

    while running.join_next().await.is_some() {}
    debug!("Dispatch loop exited");
}

async fn run_job(notifier: &WebhookNotifier, job: NotificationJob) {
    let NotificationJob { kind, events, .. } = job;

    match notifier.notify(kind, events).await {
        Ok(report) => debug!(
            webhooks = report.outcomes.len(),
            delivered = report.delivered(),
            "Notification job finished"
        ),
        Err(e) => error!(error = %e, "Notification job failed"),
    }
}
