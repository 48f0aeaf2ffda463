//! Status accounts on the social timeline API (v2)

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::{CollectorError, StatusSource};
use crate::StatusUpdate;
use crate::config::{HookKind, Target};

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(default)]
    data: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    text: String,
    created_at: DateTime<Utc>,
}

/// Reads the recent posts of the hook's account
///
/// The hook address is either a numeric account id or a handle (`@name`).
/// Handles are resolved once and cached.
pub struct TwitterSource {
    client: reqwest::Client,
    api_base: String,
    token: String,
    account_ids: HashMap<String, String>,
}

impl TwitterSource {
    pub fn new(client: reqwest::Client, api_base: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            account_ids: HashMap::new(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CollectorError> {
        let fetch_error = |source: reqwest::Error| CollectorError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CollectorError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn account_id(&mut self, address: &str) -> Result<String, CollectorError> {
        let address = address.trim();
        if !is_handle(address) {
            return Ok(address.to_string());
        }

        if let Some(id) = self.account_ids.get(address) {
            return Ok(id.clone());
        }

        let handle = address.trim_start_matches('@');
        let url = format!("{}/2/users/by/username/{handle}", self.api_base);
        let lookup: UserLookup = self.get(&url, &[]).await?;

        let id = lookup
            .data
            .map(|user| user.id)
            .ok_or_else(|| CollectorError::UnknownAccount(handle.to_string()))?;

        debug!("resolved @{handle} to account {id}");
        self.account_ids.insert(address.to_string(), id.clone());
        Ok(id)
    }
}

fn is_handle(address: &str) -> bool {
    address.starts_with('@') || !address.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl StatusSource for TwitterSource {
    fn kind(&self) -> HookKind {
        HookKind::Twitter
    }

    #[instrument(skip(self, target), fields(service = %target.name))]
    async fn fetch(
        &mut self,
        target: &Target,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusUpdate>, CollectorError> {
        let id = self.account_id(target.hook.address()).await?;

        let url = format!("{}/2/users/{id}/tweets", self.api_base);
        let start_time = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let timeline: Timeline = self
            .get(
                &url,
                &[("start_time", start_time.as_str()), ("tweet.fields", "created_at")],
            )
            .await?;

        Ok(timeline
            .data
            .into_iter()
            .map(|post| StatusUpdate::for_target(target, &post.text, &post.text, post.created_at))
            .collect())
    }
}
