//! ProbeSchedulerActor - Periodically probes the pages of every ready target
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick (15s) → ready targets → ProbePool → ProbeResult → Event::probe → dispatch funnel
//!     ↑
//!     └─── Commands (ReplaceTargets, SweepNow, Snapshot)
//! ```
//!
//! Pages of one target are probed one after another so a slow service is not
//! hit with parallel requests. Different targets are swept concurrently, the
//! pool size bounds how many probes are in flight.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::messages::SchedulerCommand;
use crate::Event;
use crate::config::Target;
use crate::probe::ProbePool;
use crate::probe::trace::ProbeContext;
use crate::util::PROBE_TICK_INTERVAL;

/// Actor owning the probe schedule
pub struct ProbeSchedulerActor {
    /// Targets with their last probe times
    targets: Vec<Target>,

    pool: ProbePool,

    /// Dispatch funnel
    event_tx: mpsc::Sender<Event>,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    cancel: CancellationToken,

    tick_interval: Duration,
}

impl ProbeSchedulerActor {
    pub fn new(
        targets: Vec<Target>,
        pool: ProbePool,
        event_tx: mpsc::Sender<Event>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        cancel: CancellationToken,
        tick_interval: Duration,
    ) -> Self {
        Self {
            targets,
            pool,
            event_tx,
            command_rx,
            cancel,
            tick_interval,
        }
    }

    #[instrument(skip(self), fields(targets = self.targets.len()))]
    pub async fn run(mut self) {
        debug!(
            "starting probe scheduler, ticking every {:?} with {} workers",
            self.tick_interval,
            self.pool.workers()
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cancellation received");
                    break;
                }

                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        probed = self.sweep() => {
                            if probed > 0 {
                                debug!("sweep probed {probed} pages");
                            }
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("probe scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::ReplaceTargets { targets } => {
                self.replace_targets(targets);
                debug!("scheduler now holds {} targets", self.targets.len());
            }

            SchedulerCommand::SweepNow { respond_to } => {
                let probed = self.sweep().await;
                let _ = respond_to.send(probed);
            }

            SchedulerCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.targets.clone());
            }
        }
    }

    /// Swap in a new snapshot, carrying probe times over by service name
    fn replace_targets(&mut self, targets: Vec<Target>) {
        let previous: HashMap<String, Option<DateTime<Utc>>> = self
            .targets
            .drain(..)
            .map(|target| (target.name, target.last_probed_at))
            .collect();

        self.targets = targets
            .into_iter()
            .map(|mut target| {
                if let Some(last) = previous.get(&target.name) {
                    target.last_probed_at = *last;
                }
                target
            })
            .collect();
    }

    /// Probe every ready target, returns the number of pages probed
    async fn sweep(&mut self) -> usize {
        let now = Utc::now();
        let pool = &self.pool;
        let event_tx = &self.event_tx;

        let sweeps = self
            .targets
            .iter_mut()
            .filter(|target| target.is_ready_to_poll(now))
            .map(|target| probe_target(pool, event_tx, target));

        join_all(sweeps).await.into_iter().sum()
    }
}

async fn probe_target(pool: &ProbePool, event_tx: &mpsc::Sender<Event>, target: &mut Target) -> usize {
    let context = ProbeContext::for_target(target);
    let pages = target.pages.clone();

    for page in &pages {
        let result = pool.probe(page, context.clone()).await;
        let completed_at = result.completed_at;

        trace!(
            "{} probed {page}: status {}",
            target.name, result.status_code
        );

        if event_tx.send(Event::probe(result)).await.is_err() {
            warn!("dispatch funnel closed, dropping probe result of {page}");
        }

        target.mark_probed(completed_at);
    }

    pages.len()
}

/// Handle for talking to the ProbeSchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler with the reference tick interval
    pub fn spawn(
        targets: Vec<Target>,
        pool: ProbePool,
        event_tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self::spawn_with_interval(targets, pool, event_tx, cancel, PROBE_TICK_INTERVAL)
    }

    pub fn spawn_with_interval(
        targets: Vec<Target>,
        pool: ProbePool,
        event_tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
        tick_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor =
            ProbeSchedulerActor::new(targets, pool, event_tx, cmd_rx, cancel, tick_interval);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn replace_targets(&self, targets: Vec<Target>) -> Result<()> {
        self.sender
            .send(SchedulerCommand::ReplaceTargets { targets })
            .await
            .context("failed to send ReplaceTargets command")
    }

    /// Probe every ready target now, returns the number of pages probed
    pub async fn sweep_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn snapshot(&self) -> Result<Vec<Target>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Snapshot { respond_to: tx })
            .await
            .context("failed to send Snapshot command")?;
        rx.await.context("failed to receive response")
    }
}
