//! Status observation and persistence
//!
//! Counts are recomputed from the fresh machine listing on every call. The
//! status is written at most once per call, and only when it changed.

use kube::ResourceExt;
use tracing::debug;

use super::client::control_plane_selector;
use super::Context;
use crate::crd::{LatticeControlPlane, LatticeControlPlaneStatus, Machine};
use crate::Error;

/// Fill in replica counts and readiness from the observed machines
pub fn observe(
    status: &mut LatticeControlPlaneStatus,
    control_plane: &LatticeControlPlane,
    cluster_name: &str,
    machines: &[Machine],
) {
    let replicas = count(machines.len());
    let ready = count(machines.iter().filter(|m| m.is_ready()).count());

    status.replicas = replicas;
    status.ready_replicas = ready;
    status.unavailable_replicas = replicas - ready;
    status.selector = Some(control_plane_selector(cluster_name));
    status.ready = ready > 0;
    status.initialized = status.initialized || ready > 0;
    status.observed_generation = control_plane.metadata.generation;
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Write `status` if it differs from what the control plane was read with
///
/// The write is guarded by the resourceVersion of that read. Returns whether
/// a write happened.
pub async fn persist(
    control_plane: &LatticeControlPlane,
    status: LatticeControlPlaneStatus,
    ctx: &Context,
) -> Result<bool, Error> {
    let current = control_plane.status.clone().unwrap_or_default();
    if current == status {
        debug!("status unchanged");
        return Ok(false);
    }

    ctx.ensure_not_cancelled()?;
    let key = control_plane.object_key()?;
    ctx.kube
        .patch_control_plane_status(&key, control_plane.resource_version(), &status)
        .await?;
    debug!(
        replicas = status.replicas,
        ready = status.ready_replicas,
        "status updated"
    );
    Ok(true)
}
