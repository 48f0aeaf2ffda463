//! StateOwnerActor - Exclusive owner of the live schedule
//!
//! Every read and write of the schedule is serialised through this actor's
//! command channel, so no other task ever touches the target list directly.
//!
//! ## Message Flow
//!
//! ```text
//! /config/refresh ── ReplaceSchedule ──┐
//! webhook / email ingress ── Validate ─┼──► StateOwnerActor ──► Option<Target> (oneshot reply)
//!                     pull tick (60s) ─┘          │
//!                                                 └──► rss / twitter collector queues
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::messages::{PushKind, StateCommand, ValidationQuery};
use crate::config::{HookKind, Schedule, Target};
use crate::util::{PULL_INTERVAL, VALIDATION_TIMEOUT};

/// Queues of the pull collectors, keyed by the kind they collect
///
/// A pull kind without a queue (e.g. no timeline API token) is skipped on every tick.
#[derive(Debug, Default)]
pub struct PullOutputs {
    outputs: HashMap<HookKind, mpsc::Sender<Target>>,
}

impl PullOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: HookKind, sender: mpsc::Sender<Target>) -> Self {
        if kind.is_pull() {
            self.outputs.insert(kind, sender);
        } else {
            warn!("ignoring collector queue for push kind {kind}");
        }
        self
    }
}

/// Actor owning the schedule
pub struct StateOwnerActor {
    /// Targets partitioned by kind, replaced wholesale on refresh
    schedule: Schedule,

    /// Pull collector queues, closed when the actor stops
    outputs: HashMap<HookKind, mpsc::Sender<Target>>,

    /// Command receiver for schedule swaps, validations and manual pulls
    command_rx: mpsc::Receiver<StateCommand>,

    /// Process-wide shutdown signal
    cancel: CancellationToken,

    pull_interval: Duration,
}

impl StateOwnerActor {
    pub fn new(
        outputs: PullOutputs,
        command_rx: mpsc::Receiver<StateCommand>,
        cancel: CancellationToken,
        pull_interval: Duration,
    ) -> Self {
        Self {
            schedule: Schedule::default(),
            outputs: outputs.outputs,
            command_rx,
            cancel,
            pull_interval,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until cancelled or until every handle has been dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting state owner actor");

        let mut ticker = interval_at(Instant::now() + self.pull_interval, self.pull_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation received");
                    break;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    let handed = self.pull();
                    trace!("pull tick handed {handed} targets to collectors");
                }
            }
        }

        // dropping the senders lets the collectors drain and stop
        self.outputs.clear();

        debug!("state owner actor stopped");
    }

    fn handle_command(&mut self, cmd: StateCommand) {
        match cmd {
            StateCommand::ReplaceSchedule { targets } => {
                self.schedule = Schedule::from_targets(&targets);
                debug!("schedule replaced with {} targets", self.schedule.len());
            }

            StateCommand::Validate(ValidationQuery {
                kind,
                key,
                respond_to,
            }) => {
                let found = self.validate(kind, &key);
                if found.is_none() {
                    debug!("no {kind:?} target matches '{key}'");
                }
                // the caller may have given up waiting
                let _ = respond_to.send(found);
            }

            StateCommand::PullNow { respond_to } => {
                let _ = respond_to.send(self.pull());
            }

            StateCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.schedule.clone());
            }
        }
    }

    /// First target of the push partition matching `key`
    fn validate(&self, kind: PushKind, key: &str) -> Option<Target> {
        match kind {
            PushKind::Webhook => self
                .schedule
                .partition(HookKind::Webhook)
                .iter()
                .find(|target| target.name == key),

            PushKind::Email => {
                let key = key.trim();
                self.schedule
                    .partition(HookKind::Email)
                    .iter()
                    .find(|target| target.hook.address().trim().eq_ignore_ascii_case(key))
            }
        }
        .cloned()
    }

    /// Hand every pull target to its collector without waiting on busy collectors
    fn pull(&self) -> usize {
        let mut handed = 0;

        for (kind, output) in &self.outputs {
            for target in self.schedule.partition(*kind) {
                match output.try_send(target.clone()) {
                    Ok(()) => handed += 1,
                    Err(TrySendError::Full(target)) => {
                        warn!("{kind} collector is busy, '{}' waits for the next pull", target.name);
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("{kind} collector has stopped");
                        break;
                    }
                }
            }
        }

        handed
    }
}

/// Handle for talking to the StateOwnerActor
#[derive(Clone)]
pub struct StateHandle {
    sender: mpsc::Sender<StateCommand>,
    validation_timeout: Duration,
}

impl StateHandle {
    /// Spawn the state owner with the reference pull interval
    pub fn spawn(outputs: PullOutputs, cancel: CancellationToken) -> Self {
        Self::spawn_with_interval(outputs, cancel, PULL_INTERVAL)
    }

    pub fn spawn_with_interval(
        outputs: PullOutputs,
        cancel: CancellationToken,
        pull_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let actor = StateOwnerActor::new(outputs, cmd_rx, cancel, pull_interval);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            validation_timeout: VALIDATION_TIMEOUT,
        }
    }

    pub async fn replace_schedule(&self, targets: Vec<Target>) -> Result<()> {
        self.sender
            .send(StateCommand::ReplaceSchedule { targets })
            .await
            .context("failed to send ReplaceSchedule command")
    }

    /// Resolve a push update to its target
    ///
    /// `Ok(None)` means the key is unknown. Errors mean the state owner could
    /// not answer in time.
    pub async fn validate(&self, kind: PushKind, key: impl Into<String>) -> Result<Option<Target>> {
        let (tx, rx) = oneshot::channel();
        let query = ValidationQuery {
            kind,
            key: key.into(),
            respond_to: tx,
        };

        let answer = async {
            self.sender
                .send(StateCommand::Validate(query))
                .await
                .context("failed to send Validate command")?;
            rx.await.context("state owner dropped the validation query")
        };

        tokio::time::timeout(self.validation_timeout, answer)
            .await
            .map_err(|_| anyhow!("validation timed out after {:?}", self.validation_timeout))?
    }

    /// Trigger the pull fan-out now, returns how many targets were handed out
    pub async fn pull_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StateCommand::PullNow { respond_to: tx })
            .await
            .context("failed to send PullNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn snapshot(&self) -> Result<Schedule> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StateCommand::Snapshot { respond_to: tx })
            .await
            .context("failed to send Snapshot command")?;
        rx.await.context("failed to receive response")
    }
}
