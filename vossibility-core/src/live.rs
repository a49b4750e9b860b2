//! Live path: queue messages to indexed live documents.
//!
//! Every [`MessageHandler`] shares one [`PauseGate`]. Handlers take a shared
//! hold for the whole duration of a message, so any number of them run in
//! parallel; a maintenance task takes the exclusive side to drain in-flight
//! messages and keep new ones from starting until it is done. Processing
//! still happens inside `handle_message`, so the returned error keeps
//! driving redelivery.
//!
//! The [`Consumer`] plays the part of the queue client: it bounds the number
//! of in-flight messages and redelivers retryable failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::blob::{Blob, EventKind, PartialMessage, LABELS_ATTRIBUTE};
use crate::contract::{BlobSink, Destination, Upstream};
use crate::error::{BlobError, HandleError};
use crate::repository::Repository;
use crate::store::TransformingStore;

/// Shared hold on the pause gate; many can coexist.
pub type Hold = OwnedRwLockReadGuard<()>;
/// Exclusive hold on the pause gate; live processing resumes when dropped.
pub type Pause = OwnedRwLockWriteGuard<()>;

/// Drain-and-pause primitive shared by all live handlers.
///
/// Backed by tokio's write-preferring `RwLock`: once [`PauseGate::pause`] is
/// waiting, no new [`PauseGate::hold`] is granted before it.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    lock: Arc<RwLock<()>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hold(&self) -> Hold {
        self.lock.clone().read_owned().await
    }

    /// Wait for every in-flight hold to be released, then block new ones
    /// until the returned guard is dropped.
    pub async fn pause(&self) -> Pause {
        info!("Pausing live processing");
        let pause = self.lock.clone().write_owned().await;
        info!("Live processing paused");
        pause
    }

    /// Run `work` with live processing paused. `work` should be bounded.
    pub async fn run_paused<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _pause = self.pause().await;
        let out = work.await;
        info!("Resuming live processing");
        out
    }
}

/// A message as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: Vec<u8>,
    /// Receipt time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Number of delivery attempts made so far.
    pub attempts: u16,
}

impl QueueMessage {
    pub fn new(body: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        QueueMessage {
            body: body.into(),
            timestamp,
            attempts: 0,
        }
    }

    /// Stamp `body` with the current time as its receipt time.
    pub fn received_now(body: impl Into<Vec<u8>>) -> Self {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::new(body, timestamp)
    }
}

pub struct MessageHandler<U: ?Sized, S: ?Sized> {
    client: Arc<U>,
    repo: Arc<Repository>,
    store: Arc<TransformingStore<S>>,
    pause_gate: PauseGate,
}

impl<U, S> MessageHandler<U, S>
where
    U: Upstream + ?Sized,
    S: BlobSink + ?Sized,
{
    pub fn new(
        client: Arc<U>,
        repo: Arc<Repository>,
        store: Arc<TransformingStore<S>>,
        pause_gate: PauseGate,
    ) -> Self {
        Self {
            client,
            repo,
            store,
            pause_gate,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Handle one queue message. An error means the message should be
    /// redelivered; a payload that does not decode is acknowledged since it
    /// never will.
    pub async fn handle_message(&self, message: &QueueMessage) -> Result<(), HandleError> {
        let _hold = self.pause_gate.hold().await;

        let partial: PartialMessage = match serde_json::from_slice(&message.body) {
            Ok(partial) => partial,
            Err(e) => {
                error!(
                    repository = %self.repo.pretty_name(),
                    error = %e,
                    "Dropping queue message that does not decode"
                );
                return Ok(());
            }
        };
        self.handle_event(
            message.timestamp,
            &partial.github_event,
            &partial.github_delivery,
            &message.body,
        )
        .await
    }

    pub async fn handle_event(
        &self,
        timestamp: i64,
        event: &str,
        delivery: &str,
        payload: &[u8],
    ) -> Result<(), HandleError> {
        if !self.repo.is_subscribed(event) {
            debug!(event, repository = %self.repo.pretty_name(), "Ignoring event");
            return Ok(());
        }
        info!(event, delivery, repository = %self.repo.pretty_name(), "Received event");

        let mut blob = Blob::from_payload(EventKind::from(event), delivery, payload).map_err(|source| {
            HandleError::Blob {
                event: event.to_string(),
                source,
            }
        })?;
        if let Err(e) = self.prepare_for_storage(&mut blob).await {
            error!(event, delivery, error = %e, "Preparing event for storage failed");
            return Err(e);
        }

        // Queue receipt time, so a backlog replay keeps the original ordering.
        blob.timestamp = DateTime::<Utc>::from_timestamp_nanos(timestamp);

        self.store
            .index(Destination::Live, &self.repo, blob)
            .await
            .map_err(|source| HandleError::Store {
                event: event.to_string(),
                source,
            })
    }

    /// Complete the blob with whatever the index needs and the payload lacks:
    /// pull request events do not always carry their labels.
    pub async fn prepare_for_storage(&self, blob: &mut Blob) -> Result<(), HandleError> {
        if blob.kind != EventKind::PullRequest || blob.has_attribute(LABELS_ATTRIBUTE) {
            return Ok(());
        }
        let event = blob.kind.to_string();
        let as_blob_error = |source: BlobError| HandleError::Blob {
            event: event.clone(),
            source,
        };

        let number = blob.get_i64("number").map_err(as_blob_error)?;
        debug!(repository = %self.repo.pretty_name(), number, "Fetching labels");
        let labels = self
            .client
            .list_labels(&self.repo, number)
            .await
            .map_err(|source| HandleError::Enrichment { number, source })?;

        let labels = serde_json::to_value(labels)
            .map_err(BlobError::from)
            .map_err(as_blob_error)?;
        blob.push(LABELS_ATTRIBUTE, labels).map_err(as_blob_error)
    }
}

/// Queue consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub max_in_flight: usize,
    /// Deliveries attempted before a message is given up on.
    pub max_attempts: u16,
    /// Delay before a redelivery, multiplied by the attempt number.
    pub retry_delay: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            max_in_flight: 16,
            max_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Messages acknowledged, including deliberate drops.
    pub finished: u64,
    /// Messages given up on after exhausting their attempts.
    pub failed: u64,
    /// Redeliveries performed.
    pub requeued: u64,
}

enum Outcome {
    Finished { requeued: u64 },
    Failed { requeued: u64 },
}

pub struct Consumer<U: ?Sized, S: ?Sized> {
    handler: Arc<MessageHandler<U, S>>,
    options: ConsumerOptions,
}

impl<U, S> Consumer<U, S>
where
    U: Upstream + ?Sized + 'static,
    S: BlobSink + ?Sized + 'static,
{
    pub fn new(handler: Arc<MessageHandler<U, S>>, options: ConsumerOptions) -> Self {
        Self { handler, options }
    }

    /// Consume until the channel closes and every in-flight message is done.
    pub async fn run(&self, mut messages: mpsc::Receiver<QueueMessage>) -> ConsumerReport {
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();
        let mut report = ConsumerReport::default();

        loop {
            tokio::select! {
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record(&mut report, joined);
                }
                message = messages.recv() => {
                    let Some(message) = message else { break };
                    let Ok(permit) = permits.clone().acquire_owned().await else { break };
                    let handler = self.handler.clone();
                    let options = self.options;
                    in_flight.spawn(async move {
                        let outcome = deliver(&handler, message, options).await;
                        drop(permit);
                        outcome
                    });
                }
            }
        }
        while let Some(joined) = in_flight.join_next().await {
            record(&mut report, joined);
        }
        info!(
            repository = %self.handler.repository().pretty_name(),
            finished = report.finished,
            failed = report.failed,
            requeued = report.requeued,
            "Queue consumer stopped"
        );
        report
    }
}

async fn deliver<U, S>(
    handler: &MessageHandler<U, S>,
    mut message: QueueMessage,
    options: ConsumerOptions,
) -> Outcome
where
    U: Upstream + ?Sized,
    S: BlobSink + ?Sized,
{
    let mut requeued = 0;
    loop {
        message.attempts += 1;
        match handler.handle_message(&message).await {
            Ok(()) => return Outcome::Finished { requeued },
            Err(e) if e.is_retryable() && message.attempts < options.max_attempts => {
                warn!(attempts = message.attempts, error = %e, "Requeueing message");
                requeued += 1;
                tokio::time::sleep(options.retry_delay * u32::from(message.attempts)).await;
            }
            Err(e) => {
                error!(attempts = message.attempts, error = %e, "Giving up on message");
                return Outcome::Failed { requeued };
            }
        }
    }
}

fn record(report: &mut ConsumerReport, joined: Result<Outcome, tokio::task::JoinError>) {
    match joined {
        Ok(Outcome::Finished { requeued }) => {
            report.finished += 1;
            report.requeued += requeued;
        }
        Ok(Outcome::Failed { requeued }) => {
            report.failed += 1;
            report.requeued += requeued;
        }
        Err(e) => {
            error!(error = %e, "Message handler task panicked");
            report.failed += 1;
        }
    }
}
