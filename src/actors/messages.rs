//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Events**: Canonical [`Event`](crate::Event)s funnelled into the dispatch sender
//! 3. **Replies**: oneshot channels, so every query is answered at most once

use tokio::sync::oneshot;

use crate::config::{Schedule, Target};

/// Push channels whose updates must be matched to a known target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    /// Lookup key is the service name from `/webhook/<name>`
    Webhook,

    /// Lookup key is the envelope sender address
    Email,
}

/// Request to resolve an unsolicited update to a configured target
///
/// Answered with `Some(target)` on a match and `None` when the key is unknown.
#[derive(Debug)]
pub struct ValidationQuery {
    pub kind: PushKind,
    pub key: String,
    pub respond_to: oneshot::Sender<Option<Target>>,
}

/// Commands that can be sent to the StateOwnerActor
#[derive(Debug)]
pub enum StateCommand {
    /// Swap the whole schedule for a new configuration snapshot
    ReplaceSchedule { targets: Vec<Target> },

    /// Resolve a push update to its target
    Validate(ValidationQuery),

    /// Hand every pull target to its collector immediately
    ///
    /// Replies with the number of targets handed out.
    PullNow { respond_to: oneshot::Sender<usize> },

    /// Copy of the current schedule
    Snapshot { respond_to: oneshot::Sender<Schedule> },
}

/// Commands that can be sent to the ProbeSchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Replace the targets being probed
    ReplaceTargets { targets: Vec<Target> },

    /// Probe every ready target now, bypassing the tick
    ///
    /// Replies with the number of pages probed.
    SweepNow { respond_to: oneshot::Sender<usize> },

    /// Copy of the held targets, including their last probe times
    Snapshot {
        respond_to: oneshot::Sender<Vec<Target>>,
    },
}

/// Commands that can be sent to the DispatchActor
#[derive(Debug)]
pub enum DispatchCommand {
    /// Delivery counters and the size of the retry backlog
    GetStats {
        respond_to: oneshot::Sender<DispatchStats>,
    },

    /// Redrive one eligible pending event now, bypassing the idle tick
    ///
    /// Replies with whether an event was redriven.
    RedriveNow { respond_to: oneshot::Sender<bool> },
}

/// Dispatch sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events taken from the funnel
    pub received: u64,

    /// Events the sink accepted
    pub delivered: u64,

    /// Delivery attempts the sink rejected or that failed in transport
    pub failed_attempts: u64,

    /// Events waiting for redelivery
    pub pending: usize,

    /// Events dropped by the retry eviction policy
    pub evicted: u64,

    /// Copies forwarded to the event bus publisher
    pub published: u64,
}
