use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use status_sentry::{
    actors::{
        bus::{BusPublisherActor, PubSubBus},
        dispatch::{DispatchConfig, DispatchHandle},
        scheduler::SchedulerHandle,
        state::{PullOutputs, StateHandle},
    },
    api::{ControlState, IngressState, spawn_control_server, spawn_ingress_server},
    collectors::{CollectorActor, RssSource, TwitterSource},
    config::HookKind,
    probe::{ProbePool, Prober},
    settings::Settings,
    util::{PROBE_TIMEOUT, http_client},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{EnvFilter, filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    // RUST_LOG replaces the default targets entirely
    let env_filter = std::env::var_os(EnvFilter::DEFAULT_ENV)
        .and_then(|_| EnvFilter::try_from_default_env().ok());

    let targets = env_filter.is_none().then(|| {
        filter::Targets::new().with_targets(vec![
            ("status_sentry", LevelFilter::TRACE),
            ("tower_http", LevelFilter::DEBUG),
        ])
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(env_filter)
        .with(targets)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let settings = Settings::parse();
    let mode = settings.run_mode();
    trace!(
        "started in {mode:?} mode, ingress on {}, control on {}",
        settings.ingress_addr(),
        settings.refresh_addr()
    );

    let cancel = CancellationToken::new();
    let client = http_client(PROBE_TIMEOUT).context("failed to build HTTP client")?;

    let source = settings.config_source();
    let targets = source
        .load(&client)
        .await
        .with_context(|| format!("failed to load initial configuration from {source:?}"))?;
    info!("loaded {} targets", targets.len());

    let bus_tx = settings.bus_config().map(|config| {
        let bus = Arc::new(PubSubBus::new(client.clone(), &config));
        BusPublisherActor::spawn(bus, config, cancel.clone())
    });
    if bus_tx.is_none() {
        info!("PROJECT_ID is not set, event bus publishing is disabled");
    }

    let sink_url = settings.sink_url();
    if sink_url.is_none() {
        warn!("OUTBOUND_URL is not set, events are not delivered to a sink");
    }

    let dispatch = DispatchHandle::spawn(
        DispatchConfig::new(sink_url),
        client.clone(),
        bus_tx,
        cancel.clone(),
    );

    let (pool, scheduler) = if mode.runs_pinger() {
        let prober = Prober::new(PROBE_TIMEOUT).context("failed to set up TLS for probes")?;
        let pool = ProbePool::spawn(settings.probe_workers, prober, cancel.clone());
        let scheduler = SchedulerHandle::spawn(
            targets.clone(),
            pool.clone(),
            dispatch.funnel(),
            cancel.clone(),
        );
        (Some(pool), Some(scheduler))
    } else {
        (None, None)
    };

    let state = if mode.runs_status_checks() {
        let rss = CollectorActor::spawn(
            RssSource::new(client.clone()),
            dispatch.funnel(),
            cancel.clone(),
        );
        let mut outputs = PullOutputs::new().with(HookKind::Rss, rss);

        match settings.twitter_token() {
            Some(token) => {
                let source = TwitterSource::new(client.clone(), &settings.twitter_api_base, token);
                let twitter = CollectorActor::spawn(source, dispatch.funnel(), cancel.clone());
                outputs = outputs.with(HookKind::Twitter, twitter);
            }
            None => warn!("TWITTER_TOKEN is not set, twitter targets are skipped"),
        }

        let state = StateHandle::spawn(outputs, cancel.clone());
        state.replace_schedule(targets).await?;
        Some(state)
    } else {
        None
    };

    spawn_ingress_server(
        settings.ingress_addr(),
        IngressState {
            state: state.clone(),
            pool,
            events: dispatch.funnel(),
        },
        cancel.clone(),
    )
    .await?;

    spawn_control_server(
        settings.refresh_addr(),
        ControlState {
            source,
            client,
            state,
            scheduler,
        },
        cancel.clone(),
    )
    .await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;

    info!("shutting down");
    cancel.cancel();

    Ok(())
}
