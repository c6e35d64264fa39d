//! Finalizer-gated teardown
//!
//! Once deletion of a control plane is requested, its machines are deleted
//! and the finalizer is released only after none are left:
//!
//! ```text
//! Active -> Draining (machines remain) -> Terminable (none remain) -> Terminated
//! ```

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::reconcile::{ClusterContext, Requeue};
use super::{status, Context, DeleteOutcome};
use crate::conditions::{self, DELETING, RESIZED};
use crate::crd::{ConditionSeverity, LatticeControlPlane, Machine, CONTROL_PLANE_FINALIZER};
use crate::Error;

/// Where a control plane is in its teardown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownState {
    /// Deletion not requested
    Active,
    /// Deletion requested, machines still exist
    Draining,
    /// Deletion requested, no machines left, finalizer still set
    Terminable,
    /// Finalizer released; the API server removes the object
    Terminated,
}

/// Classify a control plane given its current machines
pub fn teardown_state(control_plane: &LatticeControlPlane, machines: &[Machine]) -> TeardownState {
    if !control_plane.is_deleting() {
        TeardownState::Active
    } else if !machines.is_empty() {
        TeardownState::Draining
    } else if control_plane.has_finalizer() {
        TeardownState::Terminable
    } else {
        TeardownState::Terminated
    }
}

/// Advance teardown by one step
///
/// While draining, every machine not already being deleted gets a delete
/// request in this call. Machines already marked for deletion are skipped so
/// replays issue no duplicate deletes.
#[instrument(skip_all, fields(cluster = %cluster.name))]
pub async fn reconcile_delete(
    control_plane: &LatticeControlPlane,
    cluster: &ClusterContext,
    ctx: &Context,
) -> Result<Requeue, Error> {
    let namespace = control_plane.namespace().unwrap_or_default();
    let machines = ctx
        .kube
        .list_control_plane_machines(&namespace, &cluster.name)
        .await?;

    match teardown_state(control_plane, &machines) {
        TeardownState::Active | TeardownState::Terminated => Ok(Requeue::None),
        TeardownState::Terminable => {
            remove_finalizer(control_plane, ctx).await?;
            Ok(Requeue::None)
        }
        TeardownState::Draining => {
            drain(&machines, ctx).await?;

            let mut new_status = control_plane.status.clone().unwrap_or_default();
            conditions::mark_false(
                &mut new_status.conditions,
                RESIZED,
                DELETING,
                ConditionSeverity::Info,
                "",
            );
            status::observe(&mut new_status, control_plane, &cluster.name, &machines);
            status::persist(control_plane, new_status, ctx).await?;

            Ok(Requeue::After(ctx.settings.drain_wait))
        }
    }
}

/// Request deletion of every machine not already being deleted
async fn drain(machines: &[Machine], ctx: &Context) -> Result<(), Error> {
    let pending: Vec<&Machine> = machines.iter().filter(|m| !m.is_deleting()).collect();
    info!(
        machines = machines.len(),
        pending = pending.len(),
        "draining control plane machines"
    );

    for machine in pending {
        let name = machine.name_any();
        let namespace = machine.namespace().unwrap_or_default();
        ctx.ensure_not_cancelled()?;
        match ctx.kube.delete_machine(&namespace, &name).await? {
            DeleteOutcome::Deleted => debug!(machine = %name, "delete requested"),
            DeleteOutcome::NotFound => debug!(machine = %name, "machine already gone"),
        }
    }
    Ok(())
}

async fn remove_finalizer(control_plane: &LatticeControlPlane, ctx: &Context) -> Result<(), Error> {
    ctx.ensure_not_cancelled()?;
    let mut updated = control_plane.clone();
    updated
        .finalizers_mut()
        .retain(|f| f != CONTROL_PLANE_FINALIZER);
    ctx.kube.update_control_plane(&updated).await?;
    info!("no machines remain, removed finalizer");
    Ok(())
}
