//! Process settings, read from command line flags with environment fallbacks

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use clap::builder::BoolishValueParser;

use crate::actors::bus::BusConfig;
use crate::config::ConfigSource;
use crate::util::{
    DEFAULT_ADDR, DEFAULT_INGRESS_PORT, DEFAULT_PING_TOPIC, DEFAULT_PROBE_WORKERS,
    DEFAULT_PUBSUB_ENDPOINT, DEFAULT_REFRESH_PORT, DEFAULT_STATUS_TOPIC, DEFAULT_TWITTER_API,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "status-sentry", about = "Third-party service availability monitor")]
pub struct Settings {
    /// Configuration location: an http(s) URL, a file path, or empty for the built-in sample
    #[arg(long = "config", env = "CONFIG_LOCATION")]
    pub config_location: Option<String>,

    /// Address both listeners bind to
    #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(DEFAULT_ADDR))]
    pub bind_addr: IpAddr,

    /// Port of the webhook / email / probe ingress
    #[arg(long, env = "PORT", default_value_t = DEFAULT_INGRESS_PORT)]
    pub port: u16,

    /// Port of the internal configuration refresh listener
    #[arg(long, env = "REFRESH_PORT", default_value_t = DEFAULT_REFRESH_PORT)]
    pub refresh_port: u16,

    /// Downstream sink every event is POSTed to
    #[arg(long, env = "OUTBOUND_URL")]
    pub outbound_url: Option<String>,

    /// Pub/Sub project; the event bus fan-out is disabled without it
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "PUBSUB_ENDPOINT", default_value = DEFAULT_PUBSUB_ENDPOINT)]
    pub pubsub_endpoint: String,

    #[arg(long, env = "PUBSUB_TOKEN", hide_env_values = true)]
    pub pubsub_token: Option<String>,

    #[arg(long, env = "PING_RESPONSE_TOPIC", default_value = DEFAULT_PING_TOPIC)]
    pub ping_topic: String,

    #[arg(long, env = "STATUS_UPDATE_TOPIC", default_value = DEFAULT_STATUS_TOPIC)]
    pub status_topic: String,

    /// Bearer token for the social timeline API; twitter targets are skipped without it
    #[arg(long, env = "TWITTER_TOKEN", hide_env_values = true)]
    pub twitter_token: Option<String>,

    #[arg(long, env = "TWITTER_API_BASE", default_value = DEFAULT_TWITTER_API)]
    pub twitter_api_base: String,

    #[arg(long, env = "PROBE_WORKERS", default_value_t = DEFAULT_PROBE_WORKERS)]
    pub probe_workers: usize,

    /// Only run the page probes; the variable accepts 1/0, t/f, yes/no, on/off in any case
    #[arg(long, env = "PINGER_ONLY", value_parser = BoolishValueParser::new())]
    pub pinger_only: bool,

    /// Only run the status page checks
    #[arg(long, env = "STATUS_CHECK_ONLY", value_parser = BoolishValueParser::new())]
    pub status_check_only: bool,
}

/// Which halves of the system a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Both,
    PingerOnly,
    StatusCheckOnly,
}

impl RunMode {
    pub fn runs_pinger(&self) -> bool {
        !matches!(self, RunMode::StatusCheckOnly)
    }

    pub fn runs_status_checks(&self) -> bool {
        !matches!(self, RunMode::PingerOnly)
    }
}

impl Settings {
    /// Setting both `*_ONLY` switches is treated as setting neither
    pub fn run_mode(&self) -> RunMode {
        match (self.pinger_only, self.status_check_only) {
            (true, false) => RunMode::PingerOnly,
            (false, true) => RunMode::StatusCheckOnly,
            _ => RunMode::Both,
        }
    }

    pub fn config_source(&self) -> ConfigSource {
        ConfigSource::from_location(self.config_location.as_deref())
    }

    pub fn ingress_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn refresh_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.refresh_port)
    }

    pub fn sink_url(&self) -> Option<String> {
        self.outbound_url.clone().filter(|url| !url.trim().is_empty())
    }

    pub fn bus_config(&self) -> Option<BusConfig> {
        let project_id = self.project_id.clone().filter(|id| !id.trim().is_empty())?;
        Some(BusConfig {
            project_id,
            endpoint: self.pubsub_endpoint.clone(),
            token: self.pubsub_token.clone(),
            ping_topic: self.ping_topic.clone(),
            status_topic: self.status_topic.clone(),
        })
    }

    pub fn twitter_token(&self) -> Option<String> {
        self.twitter_token.clone().filter(|token| !token.trim().is_empty())
    }
}
