//! A single instrumented HTTP GET

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Empty;
use hyper::header::{CONNECTION, HOST, LOCATION, USER_AGENT};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tracing::{instrument, trace};
use url::{Host, Position, Url};

use super::{ProbeError, certs};
use crate::config::Target;
use crate::{CertificateInfo, ProbeResult, ProbeTimings};

const MAX_REDIRECTS: usize = 10;

const PROBE_USER_AGENT: &str = concat!("status-sentry/", env!("CARGO_PKG_VERSION"));

/// Service context copied into every result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeContext {
    pub service_name: String,
    pub domain: String,
    pub status_page: String,
}

impl ProbeContext {
    pub fn for_target(target: &Target) -> Self {
        Self {
            service_name: target.name.clone(),
            domain: target.domain.clone(),
            status_page: target.status_page.clone(),
        }
    }

    /// Context of a probe requested ad hoc through the probe endpoint
    pub fn ad_hoc(url: &str) -> Self {
        Self {
            service_name: "Requested site".to_string(),
            domain: url.to_string(),
            status_page: String::new(),
        }
    }
}

/// Final hop of a probe
struct Exchange {
    status: StatusCode,
    location: Option<String>,
    certificates: Vec<CertificateInfo>,
}

/// Executes instrumented probes
///
/// Cheap to clone, the TLS configuration is shared. Every probe opens its own
/// connection so that connect and handshake timings stay comparable.
#[derive(Clone)]
pub struct Prober {
    tls: TlsConnector,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, rustls::Error> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
            timeout,
        })
    }

    /// Probe `url` and describe the outcome
    ///
    /// Never fails: errors become a result with status `0` and the error text.
    #[instrument(skip(self, context), fields(service = %context.service_name))]
    pub async fn probe(&self, url: &str, context: &ProbeContext) -> ProbeResult {
        let mut timings = ProbeTimings::default();

        let outcome = match tokio::time::timeout(self.timeout, self.follow(url, &mut timings)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };

        let (status_code, error, certificates) = match outcome {
            Ok(exchange) => {
                let error = (!exchange.status.is_success()).then(|| {
                    exchange
                        .status
                        .canonical_reason()
                        .map_or_else(|| exchange.status.to_string(), str::to_string)
                });
                (exchange.status.as_u16(), error, exchange.certificates)
            }
            Err(e) => {
                trace!("probe of {url} failed: {e}");
                (0, Some(e.to_string()), Vec::new())
            }
        };

        ProbeResult {
            url: url.to_string(),
            status_code,
            error,
            timings,
            completed_at: Utc::now(),
            certificates,
            service_name: context.service_name.clone(),
            domain: context.domain.clone(),
            status_page: context.status_page.clone(),
        }
    }

    /// Probe `url`, following redirects. Timings describe the last hop.
    async fn follow(&self, url: &str, timings: &mut ProbeTimings) -> Result<Exchange, ProbeError> {
        let mut current = Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        for _ in 0..=MAX_REDIRECTS {
            *timings = ProbeTimings::default();
            let exchange = self.exchange(&current, timings).await?;

            let next = exchange
                .location
                .as_deref()
                .and_then(|location| current.join(location).ok());

            match next {
                Some(next) => {
                    trace!("following redirect {} -> {next}", exchange.status);
                    current = next;
                }
                None => return Ok(exchange),
            }
        }

        Err(ProbeError::TooManyRedirects(MAX_REDIRECTS))
    }

    async fn exchange(&self, url: &Url, timings: &mut ProbeTimings) -> Result<Exchange, ProbeError> {
        let https = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(ProbeError::UnsupportedScheme(other.to_string())),
        };

        let invalid = |reason: &str| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        let (host, addr) = match url.host() {
            Some(Host::Ipv4(ip)) => (ip.to_string(), SocketAddr::new(IpAddr::V4(ip), port)),
            Some(Host::Ipv6(ip)) => (ip.to_string(), SocketAddr::new(IpAddr::V6(ip), port)),
            Some(Host::Domain(domain)) => {
                let started = Instant::now();
                let addr = lookup_host((domain, port))
                    .await
                    .map_err(|source| ProbeError::Dns {
                        host: domain.to_string(),
                        source,
                    })?
                    .next()
                    .ok_or_else(|| ProbeError::NoAddress(domain.to_string()))?;
                timings.dns = millis(started.elapsed());
                (domain.to_string(), addr)
            }
            None => return Err(invalid("missing host")),
        };

        let started = Instant::now();
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| ProbeError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        timings.connect = millis(started.elapsed());

        let request = Request::get(&url[Position::BeforePath..Position::AfterQuery])
            .header(HOST, &url[Position::BeforeHost..Position::AfterPort])
            .header(USER_AGENT, PROBE_USER_AGENT)
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())?;

        if !https {
            let (status, location) = send(tcp, request, timings).await?;
            return Ok(Exchange {
                status,
                location,
                certificates: Vec::new(),
            });
        }

        let server_name =
            ServerName::try_from(host.clone()).map_err(|_| ProbeError::ServerName(host))?;

        let started = Instant::now();
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(ProbeError::Tls)?;
        timings.tls_handshake = millis(started.elapsed());

        let certificates = tls
            .get_ref()
            .1
            .peer_certificates()
            .map(|chain| certs::chain_info(chain, Utc::now()))
            .unwrap_or_default();

        let (status, location) = send(tls, request, timings).await?;
        Ok(Exchange {
            status,
            location,
            certificates,
        })
    }
}

/// Run one HTTP/1.1 exchange over `io`, timing the wait for the response head
async fn send<S>(
    io: S,
    request: Request<Empty<Bytes>>,
    timings: &mut ProbeTimings,
) -> Result<(StatusCode, Option<String>), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!("probe connection closed: {e}");
        }
    });

    let started = Instant::now();
    let response = sender.send_request(request).await;
    timings.first_response = millis(started.elapsed());

    // the body is not needed, dropping the driver closes the connection
    driver.abort();
    let response = response?;

    let status = response.status();
    let location = status
        .is_redirection()
        .then(|| response.headers().get(LOCATION))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok((status, location))
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
