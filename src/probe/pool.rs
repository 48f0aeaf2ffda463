//! Fixed-size pool of probe workers fed by one shared queue

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::ProbeError;
use super::trace::{ProbeContext, Prober};
use crate::{ProbeResult, ProbeTimings};

/// One page to probe and where to send the result
#[derive(Debug)]
pub struct ProbeJob {
    pub url: String,
    pub context: ProbeContext,
    pub respond_to: oneshot::Sender<ProbeResult>,
}

/// Handle to the worker pool
///
/// Cloning the handle shares the same queue and workers. The workers stop once
/// the pool is cancelled or every handle has been dropped.
#[derive(Clone)]
pub struct ProbePool {
    sender: mpsc::Sender<ProbeJob>,
    workers: usize,
}

impl ProbePool {
    /// Spawn `workers` probe workers sharing `prober`
    pub fn spawn(workers: usize, prober: Prober, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(workers * 2);
        let receiver = Arc::new(Mutex::new(receiver));

        for id in 0..workers {
            tokio::spawn(run_worker(
                id,
                Arc::clone(&receiver),
                prober.clone(),
                cancel.clone(),
            ));
        }

        debug!("probe worker pool ready with {workers} workers");

        Self { sender, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Probe one page and wait for its result
    ///
    /// Always yields a result. If the pool has shut down, the result carries
    /// status `0` and the reason.
    pub async fn probe(&self, url: &str, context: ProbeContext) -> ProbeResult {
        let (tx, rx) = oneshot::channel();
        let job = ProbeJob {
            url: url.to_string(),
            context: context.clone(),
            respond_to: tx,
        };

        if self.sender.send(job).await.is_err() {
            return unavailable(url, &context);
        }

        rx.await.unwrap_or_else(|_| unavailable(url, &context))
    }
}

fn unavailable(url: &str, context: &ProbeContext) -> ProbeResult {
    ProbeResult {
        url: url.to_string(),
        status_code: 0,
        error: Some(ProbeError::PoolClosed.to_string()),
        timings: ProbeTimings::default(),
        completed_at: Utc::now(),
        certificates: Vec::new(),
        service_name: context.service_name.clone(),
        domain: context.domain.clone(),
        status_page: context.status_page.clone(),
    }
}

#[instrument(skip(queue, prober, cancel))]
async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<ProbeJob>>>,
    prober: Prober,
    cancel: CancellationToken,
) {
    loop {
        // hold the lock only while waiting for the next job
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { queue.lock().await.recv().await } => job,
        };

        let Some(job) = job else {
            trace!("probe queue closed");
            break;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = prober.probe(&job.url, &job.context) => result,
        };

        if job.respond_to.send(result).is_err() {
            warn!("probe of {} finished after its requester went away", job.url);
        }
    }

    trace!("probe worker stopped");
}
