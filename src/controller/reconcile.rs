//! LatticeControlPlane reconciliation
//!
//! Each call re-reads the control plane, its Cluster and its machines, then
//! dispatches to exactly one phase. Every phase ends in an early return, and
//! no call performs more than one finalizer update or one machine
//! create/delete, so replaying a call against the same (possibly stale)
//! observations can't overshoot.
//!
//! Phase order:
//! 1. control plane gone: done
//! 2. no owning Cluster yet: wait
//! 3. paused: wait
//! 4. infrastructure not ready: wait
//! 5. finalizer missing: add it and stop
//! 6. deletion requested: teardown
//! 7. otherwise: converge the machine pool

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::context::Context;
use super::{deletion, machines, status};
use crate::conditions::{self, ChildReadiness, MACHINES_READY};
use crate::crd::{
    cluster_owner_reference, Cluster, LatticeControlPlane, ObjectKey, CONTROL_PLANE_FINALIZER,
};
use crate::Error;

/// Delay used for [`Requeue::Immediate`]
///
/// kube-runtime has no rate-limited "requeue now", so a short fixed delay
/// stands in for it.
pub const IMMEDIATE_REQUEUE: Duration = Duration::from_secs(1);

/// Backoff after an optimistic concurrency conflict
pub const CONFLICT_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff after a transient failure
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

/// Backoff after an error that needs a spec change or a fix to recover
pub const PERMANENT_BACKOFF: Duration = Duration::from_secs(60);

/// What the caller should do after a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next change event
    None,
    /// Reconcile again right away
    Immediate,
    /// Reconcile again after the given delay
    After(Duration),
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::None => Action::await_change(),
            Requeue::Immediate => Action::requeue(IMMEDIATE_REQUEUE),
            Requeue::After(delay) => Action::requeue(delay),
        }
    }
}

/// The parts of the owning Cluster the reconciler acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterContext {
    /// Cluster name, used for machine labels and listing
    pub name: String,
    /// Infrastructure provider reports ready
    pub infrastructure_ready: bool,
    /// Failure domains to place machines in, sorted
    pub failure_domains: Vec<String>,
    /// Control plane endpoint has host and port
    pub control_plane_endpoint_valid: bool,
    /// Reconciliation is paused on the cluster or the control plane
    pub paused: bool,
}

impl ClusterContext {
    /// Read the context for `control_plane` from its owning cluster
    pub fn new(cluster: &Cluster, control_plane: &LatticeControlPlane) -> Self {
        Self {
            name: cluster.name_any(),
            infrastructure_ready: cluster.infrastructure_ready(),
            failure_domains: cluster.failure_domain_names(),
            control_plane_endpoint_valid: cluster.control_plane_endpoint_valid(),
            paused: cluster.is_paused() || control_plane.is_paused(),
        }
    }
}

/// Reconcile a LatticeControlPlane
///
/// Entry point for the kube-runtime controller. The object handed in by the
/// watcher only supplies the key; state is re-read by [`reconcile_key`].
#[instrument(
    skip(control_plane, ctx),
    fields(
        control_plane = %control_plane.name_any(),
        namespace = %control_plane.namespace().unwrap_or_default()
    )
)]
pub async fn reconcile(
    control_plane: Arc<LatticeControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let key = control_plane.object_key()?;
    reconcile_key(&key, &ctx).await.map(Action::from)
}

/// Reconcile the control plane with the given key
pub async fn reconcile_key(key: &ObjectKey, ctx: &Context) -> Result<Requeue, Error> {
    let Some(control_plane) = ctx.kube.get_control_plane(key).await? else {
        debug!("control plane no longer exists");
        return Ok(Requeue::None);
    };

    let Some(cluster_name) = control_plane.owner_cluster_name() else {
        info!("waiting for cluster controller to set owner reference");
        return Ok(Requeue::Immediate);
    };

    let Some(cluster) = ctx.kube.get_cluster(&key.namespace, &cluster_name).await? else {
        info!(cluster = %cluster_name, "owning cluster not found");
        return Ok(Requeue::After(ctx.settings.owner_wait));
    };
    let cluster_ctx = ClusterContext::new(&cluster, &control_plane);

    if cluster_ctx.paused {
        info!("reconciliation is paused");
        return Ok(Requeue::Immediate);
    }

    if !cluster_ctx.infrastructure_ready {
        info!(cluster = %cluster_name, "waiting for cluster infrastructure");
        return Ok(Requeue::Immediate);
    }

    if !control_plane.is_deleting() && !control_plane.has_finalizer() {
        add_finalizer(&control_plane, ctx).await?;
        return Ok(Requeue::None);
    }

    if control_plane.is_deleting() {
        return deletion::reconcile_delete(&control_plane, &cluster_ctx, ctx).await;
    }

    reconcile_normal(&control_plane, &cluster, &cluster_ctx, ctx).await
}

async fn add_finalizer(control_plane: &LatticeControlPlane, ctx: &Context) -> Result<(), Error> {
    ctx.ensure_not_cancelled()?;
    let mut updated = control_plane.clone();
    updated
        .finalizers_mut()
        .push(CONTROL_PLANE_FINALIZER.to_string());
    ctx.kube.update_control_plane(&updated).await?;
    info!("added finalizer");
    Ok(())
}

/// Converge a live control plane
async fn reconcile_normal(
    control_plane: &LatticeControlPlane,
    cluster: &Cluster,
    cluster_ctx: &ClusterContext,
    ctx: &Context,
) -> Result<Requeue, Error> {
    let name = control_plane.name_any();
    let namespace = control_plane.namespace().unwrap_or_default();
    control_plane.spec.validate(&name)?;

    ctx.ensure_not_cancelled()?;
    let template_found = ctx
        .resources
        .ensure_owner_reference(
            &control_plane.spec.machine_template,
            &namespace,
            &cluster_owner_reference(cluster),
        )
        .await?;
    if !template_found {
        warn!("machine template not found");
        return Ok(Requeue::After(ctx.settings.owner_wait));
    }

    if !cluster_ctx.control_plane_endpoint_valid {
        info!("waiting for control plane endpoint");
        return Ok(Requeue::None);
    }

    let machines = ctx
        .kube
        .list_control_plane_machines(&namespace, &cluster_ctx.name)
        .await?;

    let mut new_status = control_plane.status.clone().unwrap_or_default();
    let children: Vec<ChildReadiness> = machines.iter().map(ChildReadiness::from_machine).collect();
    if let Some(aggregate) = conditions::aggregate(MACHINES_READY, &children) {
        conditions::set(&mut new_status.conditions, aggregate);
    }

    let outcome =
        machines::converge(control_plane, cluster_ctx, &machines, &mut new_status, ctx).await;

    status::observe(&mut new_status, control_plane, &cluster_ctx.name, &machines);
    let persisted = status::persist(control_plane, new_status, ctx).await;
    if let (Err(e), Err(_)) = (&persisted, &outcome) {
        warn!(error = %e, "failed to persist status");
    }

    let requeue = outcome?;
    persisted?;
    Ok(requeue)
}

/// Error policy for the controller
///
/// Logs the failure and picks a backoff from the error kind. Retry timing
/// belongs to the controller runtime; the reconciler never retries inline.
pub fn error_policy(
    control_plane: Arc<LatticeControlPlane>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        control_plane = %control_plane.name_any(),
        "reconciliation failed"
    );
    Action::requeue(backoff_for(error))
}

/// Backoff applied after a failed reconcile
pub fn backoff_for(error: &Error) -> Duration {
    match error {
        Error::Conflict { .. } => CONFLICT_BACKOFF,
        e if !e.is_retryable() => PERMANENT_BACKOFF,
        _ => DEFAULT_BACKOFF,
    }
}
