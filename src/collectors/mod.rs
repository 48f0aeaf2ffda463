//! Pull collectors for status pages
//!
//! A collector receives targets from the state owner's pull tick, fetches the
//! latest updates of each target from its [`StatusSource`] and forwards the
//! ones it has not seen yet as [`Event::status`] onto the dispatch funnel.
//!
//! ## Watermarks
//!
//! Every collector keeps its own map of service name to the newest publish time
//! forwarded so far. A service seen for the first time starts at now minus the
//! initial lookback (24h). Only updates strictly newer than the watermark go out.

pub mod rss;
pub mod twitter;

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use quick_xml::escape::unescape_with;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::{HookKind, Target};
use crate::util::{COLLECTOR_CHANNEL_CAPACITY, INITIAL_LOOKBACK};
use crate::{Event, StatusUpdate};

pub use rss::RssSource;
pub use twitter::TwitterSource;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to parse feed: {0}")]
    Feed(#[from] quick_xml::de::DeError),

    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown account '{0}'")]
    UnknownAccount(String),
}

/// Fetches the recent updates of one target
#[async_trait]
pub trait StatusSource: Send {
    fn kind(&self) -> HookKind;

    /// Updates published by `target`, at least those newer than `since`
    ///
    /// Sources that cannot filter server-side may return older updates too.
    async fn fetch(
        &mut self,
        target: &Target,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusUpdate>, CollectorError>;
}

/// Newest forwarded publish time per service
#[derive(Debug, Clone)]
pub struct Watermarks {
    marks: HashMap<String, DateTime<Utc>>,
    lookback: TimeDelta,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::new(INITIAL_LOOKBACK)
    }
}

impl Watermarks {
    pub fn new(lookback: Duration) -> Self {
        Self {
            marks: HashMap::new(),
            lookback: TimeDelta::from_std(lookback).unwrap_or(TimeDelta::hours(24)),
        }
    }

    /// Current watermark of `service`
    pub fn since(&self, service: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.marks
            .get(service)
            .copied()
            .unwrap_or_else(|| now - self.lookback)
    }

    /// Keep the updates newer than the watermark, oldest first, and advance it
    pub fn admit(
        &mut self,
        service: &str,
        mut updates: Vec<StatusUpdate>,
        now: DateTime<Utc>,
    ) -> Vec<StatusUpdate> {
        let since = self.since(service, now);

        updates.retain(|update| update.published_at > since);
        updates.sort_by_key(|update| update.published_at);

        if let Some(newest) = updates.last() {
            self.marks.insert(service.to_string(), newest.published_at);
        }

        updates
    }
}

/// Actor draining one pull queue through a [`StatusSource`]
pub struct CollectorActor<S> {
    source: S,
    watermarks: Watermarks,
    target_rx: mpsc::Receiver<Target>,
    event_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl<S: StatusSource + 'static> CollectorActor<S> {
    pub fn new(
        source: S,
        target_rx: mpsc::Receiver<Target>,
        event_tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            watermarks: Watermarks::default(),
            target_rx,
            event_tx,
            cancel,
        }
    }

    /// Spawn a collector, returns the queue the state owner pulls into
    pub fn spawn(
        source: S,
        event_tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> mpsc::Sender<Target> {
        let (target_tx, target_rx) = mpsc::channel(COLLECTOR_CHANNEL_CAPACITY);
        tokio::spawn(Self::new(source, target_rx, event_tx, cancel).run());
        target_tx
    }

    #[instrument(skip(self), fields(kind = %self.source.kind()))]
    pub async fn run(mut self) {
        debug!("starting collector");

        loop {
            let target = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation received");
                    break;
                }
                target = self.target_rx.recv() => target,
            };

            let Some(target) = target else {
                debug!("pull queue closed");
                break;
            };

            let forwarded = self.collect(&target).await;
            if forwarded > 0 {
                debug!("forwarded {forwarded} updates of {}", target.name);
            }
        }

        debug!("collector stopped");
    }

    /// Fetch one target and forward its unseen updates
    async fn collect(&mut self, target: &Target) -> usize {
        let now = Utc::now();
        let since = self.watermarks.since(&target.name, now);

        let updates = match self.source.fetch(target, since).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("skipping {} until the next pull: {e}", target.name);
                return 0;
            }
        };

        let fresh = self.watermarks.admit(&target.name, updates, now);
        let count = fresh.len();

        for update in fresh {
            trace!("{} published at {}", target.name, update.published_at);
            if self.event_tx.send(Event::status(update)).await.is_err() {
                warn!("dispatch funnel closed, dropping update of {}", target.name);
            }
        }

        count
    }
}

static REMAINING_TAGS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<[a-z/ ='\-]+?>").ok());

static EXCESS_WHITESPACE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"( |\\n|\n){3,}").ok());

const TAG_MARKERS: &[(&str, &str)] = &[
    ("<br />", "\n"),
    ("<br/>", "\n"),
    ("</p>", "\n"),
    ("<li>", "\n- "),
    ("</ul>", "\n"),
    ("<small>", "["),
    ("</small>", "]"),
    ("<strong>", "**"),
    ("</strong>", "**"),
    ("<b>", "**"),
    ("</b>", "**"),
    ("<i>", "_"),
    ("</i>", "_"),
];

fn resolve_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some(" "),
        _ => None,
    }
}

/// Turn HTML-formatted status text into readable plain text
///
/// Entities are unescaped, common formatting tags become text markers
/// (`**bold**`, `_italic_`, `- ` list items), remaining tags are stripped and
/// long whitespace runs are collapsed.
pub fn normalise_text(text: &str) -> String {
    let mut text = match unescape_with(text, resolve_entity) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.to_string(),
    };

    for (tag, marker) in TAG_MARKERS {
        text = text.replace(tag, marker);
    }

    if let Some(tags) = REMAINING_TAGS.as_ref() {
        text = tags.replace_all(&text, "").into_owned();
    }

    if let Some(whitespace) = EXCESS_WHITESPACE.as_ref() {
        text = whitespace.replace_all(&text, "$1$1").into_owned();
    }

    text.trim().to_string()
}
