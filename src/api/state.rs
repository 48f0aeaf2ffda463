//! Shared state passed to the handlers of both listeners

use tokio::sync::mpsc;

use crate::Event;
use crate::actors::scheduler::SchedulerHandle;
use crate::actors::state::StateHandle;
use crate::config::ConfigSource;
use crate::probe::ProbePool;

/// State of the ingress listener
#[derive(Clone)]
pub struct IngressState {
    /// State owner for validating webhook and email updates, if status checks run
    pub state: Option<StateHandle>,

    /// Worker pool for on-demand probes, if the prober runs
    pub pool: Option<ProbePool>,

    /// Dispatch funnel
    pub events: mpsc::Sender<Event>,
}

/// State of the control listener
#[derive(Clone)]
pub struct ControlState {
    pub source: ConfigSource,

    /// Client used to fetch remote configuration
    pub client: reqwest::Client,

    pub state: Option<StateHandle>,
    pub scheduler: Option<SchedulerHandle>,
}
