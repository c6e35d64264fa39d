//! Lattice control plane provider - Cluster API control plane controller

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use lattice_control_plane::config::ControllerConfig;
use lattice_control_plane::controller;
use lattice_control_plane::crd::LatticeControlPlane;
use lattice_control_plane::telemetry;

/// Lattice control plane provider for Cluster API
#[derive(Parser, Debug)]
#[command(name = "lattice-control-plane", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the LatticeControlPlane CRD manifest and exit
    Crd,

    /// Run the controller (default mode)
    ///
    /// Watches LatticeControlPlane objects and their control plane Machines,
    /// scaling machines to the desired replica count and draining them on
    /// deletion.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => print_crd(),
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

fn print_crd() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&LatticeControlPlane::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
    println!("{crd}");
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    telemetry::init_logging(config.log_json)?;
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    tracing::info!("Starting Lattice control plane controller");
    controller::run(client, &config, cancel).await;
    tracing::info!("Shutting down");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupt => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = interrupt.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = interrupt.await;
    }

    tracing::info!("shutdown signal received, finishing in-flight reconciles");
    token.cancel();
}
