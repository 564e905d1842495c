//! Service Provisioner Controller
//!
//! Watches Deployments in one namespace and, for every Deployment labelled
//! `ntcu-k8s=hw3` (configurable), provisions:
//! - a NodePort Service `<name>-svc` selecting the Deployment's pods
//! - optionally a ConfigMap `<name>-config`
//!
//! Derived resources are deleted again when their Deployment is deleted.

mod config;
mod controller;
mod derived;
mod error;
mod reconciler;
mod selector;
#[cfg(test)]
mod test_utils;
mod watcher;

use anyhow::Context;
use clap::Parser;
use config::{Args, LogFormat};
use controller::Controller;
use resource_client::{KubeResourceClient, ResourceClientTrait, RetryingClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Service Provisioner");

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Already installed when embedded in tests

    let credentials = args.credentials()?;
    let config = args.into_config().context("invalid configuration")?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Selector: {}", config.matcher);
    info!("  Resync: {:?}", config.resync_period);
    info!(
        "  ConfigMap: {}",
        if config.template.config_map.is_some() { "enabled" } else { "disabled" }
    );

    let kube_client = credentials
        .connect()
        .await
        .context("failed to create Kubernetes client")?;
    let client: Arc<dyn ResourceClientTrait> = Arc::new(RetryingClient::new(
        KubeResourceClient::new(kube_client.clone()),
        config.retry,
    ));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let mut controller = Controller::for_namespace(kube_client, client, &config);
    if let Err(e) = controller.run(cancel.clone()).await {
        error!("Controller failed to start: {}", e);
        cancel.cancel();
        controller.shutdown().await;
        return Err(e).context("controller startup failed");
    }

    cancel.cancelled().await;
    info!(
        phase = ?controller.phase(),
        cached = controller.store().state().len(),
        provisioned = controller.reconciler().tracked_count().await,
        pending_deletion = controller.reconciler().pending_deletions().await,
        "Shutting down"
    );
    controller.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolves on SIGINT or SIGTERM.
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received terminate signal, shutting down"),
    }
}
