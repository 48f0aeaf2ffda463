//! DispatchActor - At-least-once delivery of events to the sink
//!
//! Every producer (scheduler, collectors, ingress handlers) holds a clone of the
//! funnel sender. Each event is forwarded to the event bus, then POSTed to the
//! sink. Failed deliveries wait in a [`RetryQueue`] keyed by event id.
//!
//! ## Message Flow
//!
//! ```text
//! producers ──► funnel ──► DispatchActor ──► POST sink
//!                              │   ▲
//!                              │   └── idle scan (1s): redrive one eligible entry
//!                              └──► bus publisher (best effort)
//! ```
//!
//! The select loop is biased toward new events, so redrives only happen while
//! the funnel is empty and at most one pending event is retried per scan.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::messages::{DispatchCommand, DispatchStats};
use crate::Event;
use crate::util::EVENT_CHANNEL_CAPACITY;

/// When and how often failed deliveries are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after the first failure, doubled on every further failure
    pub initial_backoff: Duration,

    /// Failed attempts after which an event is dropped
    pub max_attempts: u32,

    /// Age of the first failure after which an event is dropped
    pub max_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(60),
            max_attempts: 16,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Retry bookkeeping of one undelivered event
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub event: Event,
    pub attempts: u32,
    pub backoff: Duration,
    pub first_failure: Instant,
    pub last_attempt: Instant,
    pub next_eligible: Instant,
}

impl RetryRecord {
    fn is_expired(&self, policy: &RetryPolicy, now: Instant) -> bool {
        self.attempts >= policy.max_attempts
            || now.saturating_duration_since(self.first_failure) >= policy.max_age
    }
}

/// Undelivered events keyed by their stable id
#[derive(Debug, Default)]
pub struct RetryQueue {
    policy: RetryPolicy,
    entries: HashMap<Uuid, RetryRecord>,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Record a failed attempt at `now`
    ///
    /// The first failure waits `initial_backoff`, every further failure of the
    /// same event doubles the previous wait.
    pub fn record_failure(&mut self, event: Event, now: Instant) -> &RetryRecord {
        let initial = self.policy.initial_backoff;

        let record = self
            .entries
            .entry(event.id)
            .and_modify(|record| {
                record.attempts += 1;
                record.backoff = record.backoff.saturating_mul(2);
            })
            .or_insert_with(|| RetryRecord {
                event,
                attempts: 1,
                backoff: initial,
                first_failure: now,
                last_attempt: now,
                next_eligible: now,
            });

        record.last_attempt = now;
        record.next_eligible = now + record.backoff;
        record
    }

    /// Forget an event after it was delivered, returns whether it was pending
    pub fn record_success(&mut self, id: &Uuid) -> bool {
        self.entries.remove(id).is_some()
    }

    /// The pending event that has been eligible the longest, if any
    pub fn next_eligible(&self, now: Instant) -> Option<Event> {
        self.entries
            .values()
            .filter(|record| record.next_eligible <= now)
            .min_by_key(|record| record.next_eligible)
            .map(|record| record.event.clone())
    }

    /// Drop every entry past the eviction policy
    pub fn evict_expired(&mut self, now: Instant) -> Vec<RetryRecord> {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, record)| record.is_expired(&self.policy, now))
            .map(|(id, _)| *id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&RetryRecord> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why one delivery attempt failed
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("sink answered {0}")]
    Rejected(reqwest::StatusCode),

    #[error("sink unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Dispatch sender settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Sink URL; without it events are only published to the bus
    pub sink_url: Option<String>,

    pub retry: RetryPolicy,

    /// How often the idle scan looks for an eligible retry
    pub scan_interval: Duration,
}

impl DispatchConfig {
    pub fn new(sink_url: Option<String>) -> Self {
        Self {
            sink_url,
            retry: RetryPolicy::default(),
            scan_interval: Duration::from_secs(1),
        }
    }
}

/// Actor delivering events to the sink
pub struct DispatchActor {
    config: DispatchConfig,

    /// Shared client, keeps sink connections alive between events
    client: reqwest::Client,

    queue: RetryQueue,

    event_rx: mpsc::Receiver<Event>,

    command_rx: mpsc::Receiver<DispatchCommand>,

    /// Event bus publisher input, if the bus is enabled
    bus_tx: Option<mpsc::Sender<Event>>,

    stats: DispatchStats,

    cancel: CancellationToken,
}

impl DispatchActor {
    pub fn new(
        config: DispatchConfig,
        client: reqwest::Client,
        event_rx: mpsc::Receiver<Event>,
        command_rx: mpsc::Receiver<DispatchCommand>,
        bus_tx: Option<mpsc::Sender<Event>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: RetryQueue::new(config.retry),
            config,
            client,
            event_rx,
            command_rx,
            bus_tx,
            stats: DispatchStats::default(),
            cancel,
        }
    }

    #[instrument(skip(self), fields(sink = self.config.sink_url.as_deref().unwrap_or("none")))]
    pub async fn run(mut self) {
        debug!("starting dispatch actor");

        let mut scan = interval(self.config.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cancellation received");
                    break;
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            debug!("event funnel closed");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                _ = scan.tick() => {
                    self.idle_scan().await;
                }
            }
        }

        if !self.queue.is_empty() {
            warn!("abandoning {} undelivered events", self.queue.len());
        }

        debug!("dispatch actor stopped");
    }

    async fn handle_command(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }

            DispatchCommand::RedriveNow { respond_to } => {
                let redriven = self.idle_scan().await;
                let _ = respond_to.send(redriven);
            }
        }
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            pending: self.queue.len(),
            ..self.stats.clone()
        }
    }

    async fn handle_event(&mut self, event: Event) {
        self.stats.received += 1;
        trace!("received event {}", event.id);

        if let Some(bus_tx) = &self.bus_tx {
            match bus_tx.try_send(event.clone()) {
                Ok(()) => self.stats.published += 1,
                Err(e) => warn!("event {} not published to the bus: {e}", event.id),
            }
        }

        if self.config.sink_url.is_some() {
            self.attempt(event).await;
        }
    }

    /// Evict expired retries, then redrive at most one eligible event
    async fn idle_scan(&mut self) -> bool {
        let now = Instant::now();

        for record in self.queue.evict_expired(now) {
            self.stats.evicted += 1;
            warn!(
                "dropping event {} after {} failed attempts",
                record.event.id, record.attempts
            );
        }

        match self.queue.next_eligible(now) {
            Some(event) => {
                debug!("redriving event {}", event.id);
                self.attempt(event).await;
                true
            }
            None => false,
        }
    }

    async fn attempt(&mut self, event: Event) {
        match self.deliver(&event).await {
            Ok(()) => {
                self.stats.delivered += 1;
                if self.queue.record_success(&event.id) {
                    debug!("event {} delivered after retrying", event.id);
                }
            }
            Err(e) => {
                self.stats.failed_attempts += 1;
                let record = self.queue.record_failure(event, Instant::now());
                warn!(
                    "delivery of event {} failed (attempt {}), retrying in {:?}: {e}",
                    record.event.id, record.attempts, record.backoff
                );
            }
        }
    }

    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
        let Some(sink_url) = self.config.sink_url.as_deref() else {
            return Ok(());
        };

        let response = self.client.post(sink_url).json(event).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(status))
        }
    }
}

/// Handle for talking to the DispatchActor
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<DispatchCommand>,
    funnel: mpsc::Sender<Event>,
}

impl DispatchHandle {
    pub fn spawn(
        config: DispatchConfig,
        client: reqwest::Client,
        bus_tx: Option<mpsc::Sender<Event>>,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let actor = DispatchActor::new(config, client, event_rx, cmd_rx, bus_tx, cancel);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            funnel: event_tx,
        }
    }

    /// Sender side of the event funnel, one clone per producer
    pub fn funnel(&self) -> mpsc::Sender<Event> {
        self.funnel.clone()
    }

    pub async fn stats(&self) -> Result<DispatchStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    /// Run an idle scan now, returns whether an event was redriven
    pub async fn redrive_now(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::RedriveNow { respond_to: tx })
            .await
            .context("failed to send RedriveNow command")?;
        rx.await.context("failed to receive response")
    }
}
