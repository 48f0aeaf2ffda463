//! Event bus fan-out
//!
//! Probe results and status updates are published to separate topics. Publishing
//! is best effort: failures are logged and the event is not retried, the sink
//! delivery in [`dispatch`](super::dispatch) is the reliable path.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::Event;
use crate::util::EVENT_CHANNEL_CAPACITY;

/// Where and how events are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub project_id: String,

    /// REST endpoint of the Pub/Sub service
    pub endpoint: String,

    /// Bearer token sent with every request, if any
    pub token: Option<String>,

    pub ping_topic: String,
    pub status_topic: String,
}

impl BusConfig {
    /// Topic an event belongs on
    pub fn topic_for(&self, event: &Event) -> &str {
        if event.is_probe() {
            &self.ping_topic
        } else {
            &self.status_topic
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("event bus rejected request for topic {topic}: {status}")]
    Rejected { topic: String, status: StatusCode },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A publish/subscribe backend
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Make sure `topic` exists before the first publish
    async fn ensure_topic(&self, _topic: &str) -> Result<(), BusError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// Google Pub/Sub over its REST API
pub struct PubSubBus {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    token: Option<String>,
}

impl PubSubBus {
    pub fn new(client: reqwest::Client, config: &BusConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            token: config.token.clone(),
        }
    }

    fn topic_url(&self, topic: &str) -> String {
        format!(
            "{}/projects/{}/topics/{}",
            self.endpoint, self.project_id, topic
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl EventBus for PubSubBus {
    async fn ensure_topic(&self, topic: &str) -> Result<(), BusError> {
        let response = self
            .authorize(self.client.put(self.topic_url(topic)))
            .json(&json!({}))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!("created topic {topic}");
                Ok(())
            }
            StatusCode::CONFLICT => {
                trace!("topic {topic} already exists");
                Ok(())
            }
            status => Err(BusError::Rejected {
                topic: topic.to_string(),
                status,
            }),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let body = json!({
            "messages": [{ "data": STANDARD.encode(payload) }]
        });

        let response = self
            .authorize(
                self.client
                    .post(format!("{}:publish", self.topic_url(topic))),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BusError::Rejected {
                topic: topic.to_string(),
                status,
            })
        }
    }
}

/// Actor publishing every event it receives to its topic
pub struct BusPublisherActor {
    bus: Arc<dyn EventBus>,
    config: BusConfig,
    event_rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl BusPublisherActor {
    pub fn new(
        bus: Arc<dyn EventBus>,
        config: BusConfig,
        event_rx: mpsc::Receiver<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            config,
            event_rx,
            cancel,
        }
    }

    /// Spawn a publisher, returns the sender the dispatch actor forwards to
    pub fn spawn(
        bus: Arc<dyn EventBus>,
        config: BusConfig,
        cancel: CancellationToken,
    ) -> mpsc::Sender<Event> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(Self::new(bus, config, event_rx, cancel).run());
        event_tx
    }

    #[instrument(skip(self), fields(project = %self.config.project_id))]
    pub async fn run(mut self) {
        debug!("starting event bus publisher");

        for topic in [&self.config.ping_topic, &self.config.status_topic] {
            if let Err(e) = self.bus.ensure_topic(topic).await {
                warn!("could not ensure topic {topic}: {e}");
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("cancellation received");
                    break;
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.publish(&event).await,
                        None => {
                            debug!("publisher input closed");
                            break;
                        }
                    }
                }
            }
        }

        debug!("event bus publisher stopped");
    }

    async fn publish(&self, event: &Event) {
        let topic = self.config.topic_for(event);

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("event {} not published: {}", event.id, BusError::from(e));
                return;
            }
        };

        match self.bus.publish(topic, &payload).await {
            Ok(()) => trace!("published event {} to {topic}", event.id),
            Err(e) => warn!("event {} not published to {topic}: {e}", event.id),
        }
    }
}
