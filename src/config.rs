use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised while parsing or loading the monitoring configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("hook '{0}' has no 'kind:' prefix")]
    MissingSeparator(String),

    #[error("unknown hook kind '{0}'")]
    UnknownKind(String),

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch configuration from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Ingestion channel a target's status updates arrive through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Webhook,
    Rss,
    Email,
    Twitter,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Webhook => "webhook",
            HookKind::Rss => "rss",
            HookKind::Email => "email",
            HookKind::Twitter => "twitter",
        }
    }

    /// Pull kinds are fetched on the state owner's tick, push kinds arrive unsolicited
    pub fn is_pull(&self) -> bool {
        matches!(self, HookKind::Rss | HookKind::Twitter)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(HookKind::Webhook),
            "rss" => Ok(HookKind::Rss),
            "email" => Ok(HookKind::Email),
            "twitter" => Ok(HookKind::Twitter),
            other => Err(ConfigError::UnknownKind(other.to_string())),
        }
    }
}

/// A `kind:address` hook, parsed once when the target is built
///
/// e.g. `rss:https://status.example.com/history.rss`, `twitter:@examplestatus`,
/// `email:alerts@example.com`, `webhook:/example`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hook {
    kind: HookKind,
    address: String,
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// The hook without its kind prefix
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl FromStr for Hook {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, address) = raw
            .split_once(':')
            .ok_or_else(|| ConfigError::MissingSeparator(raw.to_string()))?;

        Ok(Self {
            kind: kind.parse()?,
            address: address.to_string(),
        })
    }
}

impl TryFrom<String> for Hook {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Hook> for String {
    fn from(hook: Hook) -> Self {
        hook.to_string()
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.address)
    }
}

/// One monitored third-party service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Readable name, also the webhook path segment (`/webhook/<name>`)
    #[serde(rename = "service_name")]
    pub name: String,

    #[serde(rename = "service_domain", default)]
    pub domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_page: String,

    #[serde(rename = "status_source")]
    pub hook: Hook,

    #[serde(with = "humantime_serde", default = "default_poll_frequency")]
    pub poll_frequency: Duration,

    #[serde(rename = "poll_pages", default)]
    pub pages: Vec<String>,

    /// Completion time of the most recent probe of this target's pages
    #[serde(skip)]
    pub last_probed_at: Option<DateTime<Utc>>,
}

fn default_poll_frequency() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Target {
    pub fn kind(&self) -> HookKind {
        self.hook.kind()
    }

    /// Whether the pages of this target are due for another probe at `now`
    ///
    /// Targets without pages are never ready.
    pub fn is_ready_to_poll(&self, now: DateTime<Utc>) -> bool {
        if self.pages.is_empty() {
            return false;
        }

        match self.last_probed_at {
            None => true,
            Some(last) => TimeDelta::from_std(self.poll_frequency)
                .ok()
                .and_then(|frequency| last.checked_add_signed(frequency))
                .is_some_and(|due| now >= due),
        }
    }

    pub fn mark_probed(&mut self, at: DateTime<Utc>) {
        self.last_probed_at = Some(at);
    }
}

/// The full set of targets as delivered by one configuration refresh
pub type Configuration = Vec<Target>;

/// Targets partitioned by ingestion kind, in configuration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    partitions: HashMap<HookKind, Vec<Target>>,
}

impl Schedule {
    pub fn from_targets(targets: &[Target]) -> Self {
        let mut partitions: HashMap<HookKind, Vec<Target>> = HashMap::new();
        for target in targets {
            partitions
                .entry(target.kind())
                .or_default()
                .push(target.clone());
        }
        Self { partitions }
    }

    pub fn partition(&self, kind: HookKind) -> &[Target] {
        self.partitions.get(&kind).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where the authoritative configuration is loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Url(String),
    File(PathBuf),
    /// Sample configuration compiled into the binary
    Builtin,
}

impl ConfigSource {
    /// Interpret a `CONFIG_LOCATION` style value
    pub fn from_location(location: Option<&str>) -> Self {
        match location.map(str::trim) {
            None | Some("") => ConfigSource::Builtin,
            Some(loc) if loc.starts_with("http://") || loc.starts_with("https://") => {
                ConfigSource::Url(loc.to_string())
            }
            Some(loc) => ConfigSource::File(PathBuf::from(loc)),
        }
    }

    pub async fn load(&self, client: &reqwest::Client) -> Result<Configuration, ConfigError> {
        let config = match self {
            ConfigSource::Url(url) => {
                let fetch_err = |source: reqwest::Error| ConfigError::Fetch {
                    url: url.clone(),
                    source,
                };
                let body = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|res| res.error_for_status())
                    .map_err(fetch_err)?
                    .text()
                    .await
                    .map_err(fetch_err)?;
                parse_configuration(&body)?
            }
            ConfigSource::File(path) => {
                let body = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                parse_configuration(&body)?
            }
            ConfigSource::Builtin => builtin_configuration(),
        };

        debug!("loaded {} targets from {:?}", config.len(), self);
        Ok(config)
    }
}

pub fn parse_configuration(raw: &str) -> Result<Configuration, ConfigError> {
    let config: Configuration = serde_json::from_str(raw)?;
    trace!("parsed configuration: {config:?}");
    Ok(config)
}

fn sample(
    name: &str,
    domain: &str,
    status_page: &str,
    (kind, address): (HookKind, &str),
    pages: &[&str],
) -> Target {
    Target {
        name: name.to_string(),
        domain: domain.to_string(),
        status_page: status_page.to_string(),
        hook: Hook {
            kind,
            address: address.to_string(),
        },
        poll_frequency: default_poll_frequency(),
        pages: pages.iter().map(|p| p.to_string()).collect(),
        last_probed_at: None,
    }
}

/// Built-in sample targets used when no configuration location is set
pub fn builtin_configuration() -> Configuration {
    vec![
        sample(
            "Stripe",
            "stripe.com",
            "https://status.stripe.com/",
            (HookKind::Twitter, "@stripestatus"),
            &["https://www.stripe.com"],
        ),
        sample(
            "Paypal Services (incl. Braintree)",
            "paypal.com",
            "https://www.paypal-status.com/product/production",
            (HookKind::Rss, "https://www.paypal-status.com/feed/rss"),
            &["https://www.paypal.com/uk/home", "https://www.braintreepayments.com/"],
        ),
        sample(
            "Salesforce UK",
            "salesforce.com",
            "https://status.salesforce.com/",
            (HookKind::Email, "status_alerts@salesforce.com"),
            &["https://salesforce.com/uk"],
        ),
        sample(
            "GoCardless",
            "gocardless.com",
            "https://www.gocardless-status.com",
            (HookKind::Rss, "https://www.gocardless-status.com/history.rss"),
            &["https://www.gocardless.com"],
        ),
        sample(
            "Atlassian - Jira",
            "https://www.atlassian.com/software/jira",
            "https://jira-software.status.atlassian.com",
            (HookKind::Rss, "https://jira-software.status.atlassian.com/history.rss"),
            &["https://www.atlassian.com/software/jira"],
        ),
    ]
}
