//! RSS 2.0 status feeds

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{instrument, warn};

use super::{CollectorError, StatusSource, normalise_text};
use crate::StatusUpdate;
use crate::config::{HookKind, Target};
use crate::util::parse_timestamp;

#[derive(Debug, Deserialize)]
struct Feed {
    channel: Channel,
}

/// Items may be interleaved with other channel children such as `<atom:link>`
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    title: Option<String>,

    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,

    #[serde(default)]
    description: Option<String>,

    #[serde(rename = "content:encoded", alias = "encoded", default)]
    content_encoded: Option<String>,
}

impl Item {
    /// Full text if present, otherwise the summary
    fn body(&self) -> &str {
        self.content_encoded
            .as_deref()
            .filter(|content| !content.trim().is_empty())
            .or(self.description.as_deref())
            .or(self.title.as_deref())
            .unwrap_or_default()
    }
}

/// Parse a feed document into the updates of `target`
///
/// Items without a readable date are skipped.
pub fn parse_feed(target: &Target, xml: &str) -> Result<Vec<StatusUpdate>, CollectorError> {
    let feed: Feed = quick_xml::de::from_str(xml)?;

    let updates = feed
        .channel
        .items
        .iter()
        .filter_map(|item| {
            let Some(published_at) = item.pub_date.as_deref().and_then(parse_timestamp) else {
                warn!(
                    "skipping item of {} without a readable date: {:?}",
                    target.name, item.pub_date
                );
                return None;
            };

            let raw = item.body();
            Some(StatusUpdate::for_target(
                target,
                normalise_text(raw),
                raw,
                published_at,
            ))
        })
        .collect();

    Ok(updates)
}

/// Reads the feed at the hook address
pub struct RssSource {
    client: reqwest::Client,
}

impl RssSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusSource for RssSource {
    fn kind(&self) -> HookKind {
        HookKind::Rss
    }

    #[instrument(skip(self, target, _since), fields(service = %target.name))]
    async fn fetch(
        &mut self,
        target: &Target,
        _since: DateTime<Utc>,
    ) -> Result<Vec<StatusUpdate>, CollectorError> {
        let url = target.hook.address();
        let fetch_error = |source: reqwest::Error| CollectorError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.text().await.map_err(fetch_error)?;
        parse_feed(target, &body)
    }
}
