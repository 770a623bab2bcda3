//! Mimir Rules Operator
//!
//! Main entry point for the operator. Loads the configuration, sets up the
//! Kubernetes client, and runs the rules controller and the metrics server.

use clap::Parser;
use kube::Client;
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mimir_rules_operator::{
    config::Arguments,
    controllers::{Controller, ControllerHandle, KubeConnector},
    metrics::{self, Metrics, ServerState},
};

/// Synchronizes PrometheusRule resources into a Mimir ruler
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the YAML configuration file. Re-read on SIGHUP.
    #[arg(long, env = "MIMIR_RULES_OPERATOR_CONFIG")]
    config: PathBuf,

    /// Port of the metrics and health server
    #[arg(long, env = "MIMIR_RULES_OPERATOR_METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing();

    info!("Starting Mimir Rules Operator");

    let args = Arguments::load(&cli.config)?;
    info!(config = %cli.config.display(), address = %args.address, "Loaded configuration");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let metrics = Metrics::new();
    metrics.register(prometheus::default_registry())?;

    let (controller, handle) = Controller::new(KubeConnector::new(client), args, metrics);

    // Start metrics server
    let server_state = ServerState {
        health: handle.health(),
        lifecycle: handle.subscribe_state(),
    };
    let metrics_handle = tokio::spawn(metrics::serve(cli.metrics_port, server_state));
    info!("Metrics server starting on port {}", cli.metrics_port);

    let shutdown = CancellationToken::new();
    let mut controller_handle = tokio::spawn(controller.run(shutdown.clone()));
    let reload_handle = tokio::spawn(reload_on_sighup(cli.config.clone(), handle));

    // Handle graceful shutdown
    tokio::select! {
        _ = &mut controller_handle => {
            error!("Rules controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    reload_handle.abort();
    if !controller_handle.is_finished() {
        if let Err(e) = controller_handle.await {
            error!("Rules controller task failed: {}", e);
        }
    }

    info!("Mimir Rules Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,mimir_rules_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

async fn reload(path: &Path, handle: &ControllerHandle) -> mimir_rules_operator::Result<()> {
    let args = Arguments::load(path)?;
    handle.update(args).await
}

/// Re-read the configuration file on every SIGHUP and hand it to the controller
#[cfg(unix)]
async fn reload_on_sighup(path: PathBuf, handle: ControllerHandle) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!(config = %path.display(), "Received SIGHUP, reloading configuration");
        match reload(&path, &handle).await {
            Ok(()) => info!("Configuration reloaded"),
            Err(e) => error!("Failed to reload configuration: {}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_sighup(_path: PathBuf, _handle: ControllerHandle) {
    std::future::pending::<()>().await
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
