//! wgpanel Server
//!
//! Serves the panel commands over HTTP/JSON, samples host metrics and
//! keeps peers and credentials on disk.

mod handlers;
mod storage;
mod system;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wgpanel_core::{
    CommandDaemon, CredentialVault, HttpRelayProvider, LogFormat, MetricsFeed, NoopDaemon,
    PanelConfig, PeerRegistry, ServiceController, TunnelDaemon, spawn_adapter,
};

use crate::handlers::AppState;
use crate::storage::StateStore;
use crate::system::SystemSampler;

const DEFAULT_FILTER: &str = "wgpanel_server=info,wgpanel_core=info,tower_http=info";

/// WireGuard server control panel
#[derive(Debug, Parser)]
#[command(name = "wgpanel-server", version, about)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PanelConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PanelConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    init_tracing(config.server.log_format);

    // Restore persisted state
    let store = Arc::new(StateStore::new(&config.server.state_dir));
    store.init().await?;
    let peers = store.load_peers().await?;
    let credentials = store.load_credentials().await?;
    info!(
        "State directory {} ({} peers, credentials {})",
        store.dir().display(),
        peers.len(),
        if credentials.is_some() { "present" } else { "absent" }
    );

    let registry = Arc::new(PeerRegistry::with_peers(config.registry_options(), peers));

    let daemon: Arc<dyn TunnelDaemon> = if config.daemon.dry_run {
        warn!("Dry run: tunnel commands will not be executed");
        Arc::new(NoopDaemon)
    } else {
        let (up, down) = config.daemon_commands();
        Arc::new(CommandDaemon::new(up, down))
    };
    let controller = Arc::new(ServiceController::new(daemon, config.launch_timeout()));

    let provider = HttpRelayProvider::new(config.relay.endpoint.clone(), config.relay_timeout())
        .context("building relay client")?;
    let vault = Arc::new(CredentialVault::with_credentials(
        Arc::new(provider),
        config.discovery_options(),
        credentials,
    ));

    let sampler = Arc::new(SystemSampler::new());
    sampler.start().context("starting system sampler")?;
    let metrics = MetricsFeed::new(
        registry.clone(),
        controller.clone(),
        sampler.clone(),
        config.activity_window(),
    );

    let (reporter, adapter) = spawn_adapter(
        registry.clone(),
        controller.clone(),
        config.daemon.event_buffer,
    );

    tokio::spawn(log_transitions(controller.clone()));
    let persister = tokio::spawn(persist_periodically(
        store.clone(),
        registry.clone(),
        vault.clone(),
        config.persist_interval(),
    ));

    let state = Arc::new(AppState {
        registry: registry.clone(),
        controller: controller.clone(),
        vault: vault.clone(),
        metrics,
        reporter,
        export: config.export.clone(),
        store: Some(store.clone()),
    });
    let app = handlers::router(state);

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Panel listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    persister.abort();
    sampler.stop();

    if let Err(e) = controller.stop().await {
        error!("Failed to stop tunnel: {}", e);
    }

    // the router owned the last reporter; let the adapter drain
    if tokio::time::timeout(Duration::from_secs(5), adapter).await.is_err() {
        warn!("Daemon adapter did not drain in time");
    }

    store.save_all(&registry, &vault).await?;
    info!("State saved");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Flush usage counters to disk on a fixed interval
async fn persist_periodically(
    store: Arc<StateStore>,
    registry: Arc<PeerRegistry>,
    vault: Arc<CredentialVault>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = store.save_all(&registry, &vault).await {
            error!("Periodic persist failed: {}", e);
        }
    }
}

async fn log_transitions(controller: Arc<ServiceController>) {
    let mut transitions = controller.subscribe();
    drop(controller);

    loop {
        match transitions.recv().await {
            Ok(state) => info!(?state, "Service state changed"),
            Err(RecvError::Lagged(missed)) => warn!("Missed {} state transitions", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
