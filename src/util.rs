use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub const DEFAULT_INGRESS_PORT: u16 = 8080;

pub const DEFAULT_REFRESH_PORT: u16 = 8099;

pub const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub const DEFAULT_PROBE_WORKERS: usize = 20;

pub const DEFAULT_PING_TOPIC: &str = "pagePings";

pub const DEFAULT_STATUS_TOPIC: &str = "statusUpdates";

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

pub const DEFAULT_TWITTER_API: &str = "https://api.twitter.com";

/// How often the state owner hands pull targets to their collectors
pub const PULL_INTERVAL: Duration = Duration::from_secs(60);

/// How often the probe scheduler looks for targets that are due
pub const PROBE_TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a single probe, including redirects
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the state owner to answer a validation query
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the event funnel feeding the dispatch sender
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of each collector's input queue
pub const COLLECTOR_CHANNEL_CAPACITY: usize = 64;

/// Fetched items older than this are ignored on a collector's first pass
pub const INITIAL_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(5 * 60))
        .build()
}

/// Parse a publish date as found in feeds and mail headers
///
/// RFC 2822 is tried first, then RFC 3339.
pub fn parse_timestamp(date: &str) -> Option<DateTime<Utc>> {
    let date = date.trim();
    DateTime::parse_from_rfc2822(date)
        .or_else(|_| DateTime::parse_from_rfc3339(date))
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("Tue, 10 Jun 2025 09:30:00 +0000"),
            Some(Utc.with_ymd_and_hms(2025, 6, 10, 9, 30, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp(" 2025-06-10T13:00:00+02:00 "),
            Some(Utc.with_ymd_and_hms(2025, 6, 10, 11, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
