//! Machine pool management
//!
//! Compares desired replicas with the observed machines and takes at most one
//! step towards convergence per call: create one machine or delete one
//! machine. Repeated calls with fresh observations walk the pool to the
//! desired size without ever acting twice on the same stale listing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::reconcile::{ClusterContext, Requeue};
use super::Context;
use crate::conditions::{
    self, BOOTSTRAP_TEMPLATE_CLONING_FAILED, INFRASTRUCTURE_TEMPLATE_CLONING_FAILED,
    MACHINES_CREATED, MACHINES_READY, MACHINE_CREATION_FAILED, RESIZED, SCALING_DOWN,
    SCALING_UP,
};
use crate::crd::{
    Bootstrap, ConditionSeverity, LatticeControlPlane, LatticeControlPlaneStatus, Machine,
    MachineSpec, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL,
};
use crate::provisioner::{generate_name, BootstrapRequest, CloneRequest};
use crate::Error;

/// The single step to take towards the desired replica count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolAction {
    /// No machines yet: create the first one
    Bootstrap,
    /// Fewer machines than desired: create one
    ScaleUp,
    /// More machines than desired: delete one
    ScaleDown,
    /// Observed matches desired
    Steady,
}

/// Decide the next pool action from desired and observed counts
pub fn plan(desired: i32, observed: usize) -> PoolAction {
    let desired = usize::try_from(desired).unwrap_or(0);
    match observed {
        0 if desired > 0 => PoolAction::Bootstrap,
        n if n < desired => PoolAction::ScaleUp,
        n if n > desired => PoolAction::ScaleDown,
        _ => PoolAction::Steady,
    }
}

/// Pick the machine to remove when scaling down
///
/// The oldest machine not already being deleted. Among equal creation
/// timestamps the first in listing order wins.
pub fn select_victim(machines: &[Machine]) -> Option<&Machine> {
    let mut victim: Option<&Machine> = None;
    for machine in machines.iter().filter(|m| !m.is_deleting()) {
        let older = victim.map_or(true, |v| creation_time(machine) < creation_time(v));
        if older {
            victim = Some(machine);
        }
    }
    victim
}

fn creation_time(machine: &Machine) -> Option<chrono::DateTime<chrono::Utc>> {
    machine.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// Take one step towards `spec.replicas` control plane machines
///
/// Conditions are recorded on `status`; the caller persists it.
#[instrument(skip_all, fields(desired = control_plane.spec.replicas, observed = machines.len()))]
pub async fn converge(
    control_plane: &LatticeControlPlane,
    cluster: &ClusterContext,
    machines: &[Machine],
    status: &mut LatticeControlPlaneStatus,
    ctx: &Context,
) -> Result<Requeue, Error> {
    let desired = control_plane.spec.replicas;
    let observed = machines.len();

    match plan(desired, observed) {
        PoolAction::Bootstrap => {
            info!("initializing control plane");
            boot_control_plane(control_plane, cluster, status, ctx).await
        }
        PoolAction::ScaleUp => {
            conditions::mark_false(
                &mut status.conditions,
                RESIZED,
                SCALING_UP,
                ConditionSeverity::Warning,
                format!(
                    "Scaling up control plane to {} replicas (actual {})",
                    desired, observed
                ),
            );
            info!("scaling up control plane");
            boot_control_plane(control_plane, cluster, status, ctx).await
        }
        PoolAction::ScaleDown => {
            conditions::mark_false(
                &mut status.conditions,
                RESIZED,
                SCALING_DOWN,
                ConditionSeverity::Warning,
                format!(
                    "Scaling down control plane to {} replicas (actual {})",
                    desired, observed
                ),
            );
            info!("scaling down control plane");
            scale_down(control_plane, machines, ctx).await
        }
        PoolAction::Steady => {
            if conditions::has(&status.conditions, MACHINES_READY) {
                conditions::mark_true(&mut status.conditions, RESIZED);
            }
            conditions::mark_true(&mut status.conditions, MACHINES_CREATED);
            debug!("control plane at desired replicas");
            Ok(Requeue::None)
        }
    }
}

/// Delete the oldest surplus machine
async fn scale_down(
    control_plane: &LatticeControlPlane,
    machines: &[Machine],
    ctx: &Context,
) -> Result<Requeue, Error> {
    if machines.is_empty() {
        return Err(Error::invariant("no machines to scale down"));
    }

    let desired = usize::try_from(control_plane.spec.replicas).unwrap_or(0);
    let active = machines.iter().filter(|m| !m.is_deleting()).count();
    if active <= desired {
        info!(
            active,
            deleting = machines.len() - active,
            "surplus machines already deleting, waiting"
        );
        return Ok(Requeue::After(ctx.settings.drain_wait));
    }

    let Some(victim) = select_victim(machines) else {
        return Ok(Requeue::After(ctx.settings.drain_wait));
    };
    let name = victim.name_any();
    let namespace = victim.namespace().unwrap_or_default();

    ctx.ensure_not_cancelled()?;
    info!(machine = %name, "deleting machine");
    let outcome = ctx.kube.delete_machine(&namespace, &name).await?;
    debug!(machine = %name, ?outcome, "delete requested");

    Ok(Requeue::Immediate)
}

/// Create one control plane machine with its infrastructure and bootstrap config
///
/// Failures are recorded as `MachinesCreated=False` with a reason naming the
/// step that failed, then returned.
async fn boot_control_plane(
    control_plane: &LatticeControlPlane,
    cluster: &ClusterContext,
    status: &mut LatticeControlPlaneStatus,
    ctx: &Context,
) -> Result<Requeue, Error> {
    match create_machine(control_plane, cluster, ctx).await {
        Ok(machine) => {
            info!(
                machine = %machine.name_any(),
                failure_domain = ?machine.spec.failure_domain,
                "created machine"
            );
            Ok(Requeue::Immediate)
        }
        Err(Error::Provisioning { reason, message }) => {
            warn!(%reason, %message, "machine provisioning failed");
            conditions::mark_false(
                &mut status.conditions,
                MACHINES_CREATED,
                &reason,
                ConditionSeverity::Error,
                message.clone(),
            );
            Err(Error::Provisioning { reason, message })
        }
        Err(e) => Err(e),
    }
}

async fn create_machine(
    control_plane: &LatticeControlPlane,
    cluster: &ClusterContext,
    ctx: &Context,
) -> Result<Machine, Error> {
    let namespace = control_plane.namespace().unwrap_or_default();
    let cp_name = control_plane.name_any();
    let template_name = control_plane
        .spec
        .machine_template
        .name
        .clone()
        .unwrap_or_default();

    let (infra_name, bootstrap_name, machine_name, failure_domain) = ctx.with_rng(|rng| {
        (
            generate_name(&format!("{}-", template_name), rng),
            generate_name(&format!("{}-", cp_name), rng),
            generate_name(&format!("{}-", cp_name), rng),
            pick_failure_domain(&cluster.failure_domains, rng),
        )
    });

    // The infrastructure clone is adopted by its Machine later, so we own it
    // without claiming the controller reference.
    ctx.ensure_not_cancelled()?;
    let infrastructure_ref = ctx
        .resources
        .clone_template(&CloneRequest {
            template: control_plane.spec.machine_template.clone(),
            namespace: namespace.clone(),
            name: infra_name,
            owner: control_plane.owner_reference(false, false),
            cluster_name: cluster.name.clone(),
        })
        .await
        .map_err(|e| Error::provisioning(INFRASTRUCTURE_TEMPLATE_CLONING_FAILED, e.to_string()))?;

    ctx.ensure_not_cancelled()?;
    let config_ref = ctx
        .resources
        .create_bootstrap_config(&BootstrapRequest {
            config: control_plane.spec.control_plane_config.clone(),
            namespace: namespace.clone(),
            name: bootstrap_name,
            owner: control_plane.owner_reference(false, true),
            cluster_name: cluster.name.clone(),
        })
        .await
        .map_err(|e| Error::provisioning(BOOTSTRAP_TEMPLATE_CLONING_FAILED, e.to_string()))?;

    let machine = build_machine(
        control_plane,
        cluster,
        machine_name,
        infrastructure_ref,
        config_ref,
        failure_domain,
    );

    ctx.ensure_not_cancelled()?;
    ctx.kube
        .create_machine(&machine)
        .await
        .map_err(|e| {
            Error::provisioning(
                MACHINE_CREATION_FAILED,
                format!("failed to create machine: {}", e),
            )
        })
}

/// Choose a failure domain uniformly at random
///
/// No balancing across existing machines.
fn pick_failure_domain<R: Rng>(domains: &[String], rng: &mut R) -> Option<String> {
    if domains.is_empty() {
        return None;
    }
    Some(domains[rng.gen_range(0..domains.len())].clone())
}

/// Build a control plane Machine owned (as controller) by the control plane
fn build_machine(
    control_plane: &LatticeControlPlane,
    cluster: &ClusterContext,
    name: String,
    infrastructure_ref: ObjectReference,
    config_ref: ObjectReference,
    failure_domain: Option<String>,
) -> Machine {
    let labels = BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster.name.clone()),
        (CONTROL_PLANE_LABEL.to_string(), String::new()),
    ]);

    Machine {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: control_plane.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![control_plane.owner_reference(true, true)]),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: cluster.name.clone(),
            bootstrap: Bootstrap {
                config_ref: Some(config_ref),
                data_secret_name: None,
            },
            infrastructure_ref,
            version: control_plane.spec.version.clone(),
            failure_domain,
        },
        status: None,
    }
}
