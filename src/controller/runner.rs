//! Controller runner - wires the reconciler into the kube-runtime controller
//!
//! The controller watches LatticeControlPlane objects and the control plane
//! Machines they own, so a machine becoming ready or disappearing triggers a
//! reconcile of its owner.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerSettings;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{error_policy, reconcile, Context};
use crate::config::ControllerConfig;
use crate::crd::{LatticeControlPlane, Machine, CONTROL_PLANE_LABEL};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the LatticeControlPlane controller until shutdown
///
/// `cancel` is shared with the reconciler: once it fires, in-flight
/// reconciles stop before their next mutation and the controller drains.
pub async fn run(client: Client, config: &ControllerConfig, cancel: CancellationToken) {
    let ctx = Arc::new(
        Context::builder(client.clone())
            .field_manager(config.field_manager.clone())
            .settings(config.settings())
            .seed(config.seed)
            .cancellation(cancel.clone())
            .build(),
    );

    let (control_planes, machines): (Api<LatticeControlPlane>, Api<Machine>) =
        match config.namespace.as_deref() {
            Some(ns) => {
                info!(namespace = %ns, "watching a single namespace");
                (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns))
            }
            None => (Api::all(client.clone()), Api::all(client)),
        };

    info!(
        concurrency = config.concurrency,
        "- LatticeControlPlane controller"
    );

    Controller::new(
        control_planes,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(
        machines,
        WatcherConfig::default()
            .timeout(WATCH_TIMEOUT_SECS)
            .labels(CONTROL_PLANE_LABEL),
    )
    .with_config(ControllerSettings::default().concurrency(config.concurrency))
    .graceful_shutdown_on(cancel.cancelled_owned())
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("LatticeControlPlane"))
    .await;

    info!("controller stopped");
}

/// Log the outcome of each reconcile emitted by the controller stream
pub fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
