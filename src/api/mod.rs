//! HTTP listeners
//!
//! ## Ingress (`PORT`, default 8080)
//!
//! - `GET /` - Greeting
//! - `POST /webhook/:service` - Status update pushed by a service (status checks only)
//! - `POST /email` - Inbound mail relayed as JSON (status checks only)
//! - `GET|POST /probe` - Probe a page on demand (prober only)
//!
//! ## Control (`REFRESH_PORT`, default 8099)
//!
//! - `POST /config/refresh` - Reload the configuration
//! - anything else - 400

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ControlState, IngressState};

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Router of the ingress listener
///
/// Push routes only exist while status checks run, `/probe` only while the
/// prober runs.
pub fn ingress_router(state: IngressState) -> Router {
    let mut router = Router::new().route("/", get(routes::ingress::welcome));

    if state.state.is_some() {
        router = router
            .route("/webhook/:service", post(routes::ingress::webhook))
            .route("/email", post(routes::ingress::email));
    }

    if state.pool.is_some() {
        router = router.route(
            "/probe",
            get(routes::probe::probe).post(routes::probe::probe),
        );
    }

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router of the control listener
pub fn control_router(state: ControlState) -> Router {
    Router::new()
        .route("/config/refresh", post(routes::control::refresh))
        .fallback(routes::control::not_public)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the ingress server, returns its local address
pub async fn spawn_ingress_server(
    addr: SocketAddr,
    state: IngressState,
    cancel: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    serve("ingress", addr, ingress_router(state), cancel).await
}

/// Spawn the control server, returns its local address
pub async fn spawn_control_server(
    addr: SocketAddr,
    state: ControlState,
    cancel: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    serve("control", addr, control_router(state), cancel).await
}

async fn serve(
    name: &'static str,
    addr: SocketAddr,
    app: Router,
    cancel: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr}"))?;
    let local = listener.local_addr()?;

    info!("{name} server listening on {local}");

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("{name} server error: {e}");
        }
        info!("{name} server stopped");
    });

    Ok(local)
}
