//! Instrumented page probes and the worker pool that runs them
//!
//! A probe is a single HTTP GET over a fresh connection, timed phase by phase:
//!
//! ```text
//! lookup_host ──► TcpStream::connect ──► TLS handshake (https only) ──► request ──► response head
//!     dns              connect               tls_handshake                  first_response
//! ```
//!
//! Failures never escape as errors. Every probe ends in a [`ProbeResult`],
//! with `status_code == 0` and the error text when no response was obtained.

pub mod certs;
pub mod pool;
pub mod trace;

use std::time::Duration;

use thiserror::Error;

pub use pool::ProbePool;
pub use trace::Prober;

/// Errors raised during the phases of a probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("DNS lookup failed for {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("DNS lookup returned no addresses for {0}")]
    NoAddress(String),

    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("probe worker pool is unavailable")]
    PoolClosed,
}
