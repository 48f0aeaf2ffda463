//! Long-lived units of the monitor
//!
//! Each actor runs as an independent tokio task and is reached through a
//! cloneable handle wrapping its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 /config/refresh
//!          ReplaceTargets │ ReplaceSchedule          webhook / email ingress
//!                ┌────────┴────────┐                        │ Validate
//!                ▼                 ▼                        │
//!        ┌──────────────┐   ┌──────────────┐◄───────────────┘
//!        │  Scheduler   │   │ State Owner  │── pull tick ──► rss / twitter collectors
//!        └──────┬───────┘   └──────────────┘                         │
//!               │ ProbePool (N workers)                              │
//!               ▼                                                    ▼
//!        ════════════════════ event funnel (mpsc<Event>) ════════════════
//!                                   │
//!                                   ▼
//!                          ┌────────────────┐
//!                          │    Dispatch    │──► sink (POST, retried)
//!                          └───────┬────────┘
//!                                  ▼
//!                        bus publisher (best effort)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Producers share one funnel into the dispatch actor
//! 3. **Request/Response**: oneshot channels for queries
//! 4. **Shutdown**: every actor observes the same `CancellationToken`

pub mod bus;
pub mod dispatch;
pub mod messages;
pub mod scheduler;
pub mod state;
