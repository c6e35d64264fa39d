//! Integration tests for the control plane lifecycle
//!
//! These drive `reconcile_key` against a real API server, the way the
//! controller runtime would, and check the Machine objects it leaves behind.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tokio::time::sleep;

use lattice_control_plane::controller::{control_plane_selector, reconcile_key, Context, Requeue};
use lattice_control_plane::crd::{LatticeControlPlane, Machine, ObjectKey};

use super::helpers::{
    cleanup, create_ready_cluster, ensure_test_cluster, sample_control_plane, StaticResources,
    TEST_NAMESPACE,
};

const MAX_CALLS: usize = 20;

fn context(client: &Client) -> Context {
    Context::builder(client.clone())
        .resources(Arc::new(StaticResources))
        .seed(Some(7))
        .build()
}

async fn machines(client: &Client, cluster: &str) -> Vec<Machine> {
    let api: Api<Machine> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.list(&ListParams::default().labels(&control_plane_selector(cluster)))
        .await
        .expect("failed to list machines")
        .items
}

/// Reconcile until `done` holds after a call returning no requeue
async fn reconcile_until<F>(
    client: &Client,
    cluster: &str,
    key: &ObjectKey,
    ctx: &Context,
    mut done: F,
) where
    F: FnMut(&[Machine]) -> bool,
{
    for _ in 0..MAX_CALLS {
        let requeue = reconcile_key(key, ctx).await.expect("reconcile failed");
        let current = machines(client, cluster).await;
        if requeue == Requeue::None && done(&current) {
            return;
        }
        sleep(Duration::from_millis(200)).await;
    }
    panic!("reconcile did not settle after {} calls", MAX_CALLS);
}

/// Story: A new control plane grows to its replica count, then is torn down
///
/// Cluster API creates a Cluster and a LatticeControlPlane asking for two
/// replicas. The reconciler adds its finalizer, creates one Machine per call
/// until there are two, and publishes the counts. Deleting the control plane
/// removes the Machines before the finalizer is released.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_control_plane_scales_up_and_tears_down() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let cluster_name = "lifecycle";
    let cp_name = "lifecycle-cp";
    cleanup(&client, cluster_name, cp_name).await;

    let cluster = create_ready_cluster(&client, cluster_name).await;
    let cps: Api<LatticeControlPlane> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    cps.create(
        &PostParams::default(),
        &sample_control_plane(cp_name, &cluster, 2),
    )
    .await
    .expect("failed to create control plane");

    let ctx = context(&client);
    let key = ObjectKey::new(TEST_NAMESPACE, cp_name);

    // Act: reconcile to a fixed point
    reconcile_until(&client, cluster_name, &key, &ctx, |m| m.len() == 2).await;

    // Assert: machines are owned by the control plane
    let cp = cps.get(cp_name).await.expect("control plane exists");
    assert!(cp.has_finalizer());
    let created = machines(&client, cluster_name).await;
    assert_eq!(created.len(), 2);
    for machine in &created {
        let owner = machine
            .owner_references()
            .iter()
            .find(|o| o.controller == Some(true))
            .expect("machine has a controller owner");
        assert_eq!(owner.name, cp_name);
        assert_eq!(machine.spec.cluster_name, cluster_name);
    }
    let status = cp.status.expect("status written");
    assert_eq!(status.replicas, 2);
    assert_eq!(
        status.selector.as_deref(),
        Some(control_plane_selector(cluster_name).as_str())
    );

    // Act: delete the control plane
    cps.delete(cp_name, &DeleteParams::default())
        .await
        .expect("failed to request deletion");

    // Assert: machines go first, then the control plane itself
    for _ in 0..MAX_CALLS {
        reconcile_key(&key, &ctx).await.expect("teardown failed");
        if cps.get_opt(cp_name).await.expect("read control plane").is_none() {
            break;
        }
        sleep(Duration::from_millis(200)).await;
    }
    assert!(cps.get_opt(cp_name).await.expect("read").is_none());
    assert!(machines(&client, cluster_name).await.is_empty());

    cleanup(&client, cluster_name, cp_name).await;
}

/// Story: Lowering replicas removes the oldest machine first
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_scale_down_removes_oldest_machine() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let cluster_name = "lifecycle";
    let cp_name = "lifecycle-cp";
    cleanup(&client, cluster_name, cp_name).await;

    let cluster = create_ready_cluster(&client, cluster_name).await;
    let cps: Api<LatticeControlPlane> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    cps.create(
        &PostParams::default(),
        &sample_control_plane(cp_name, &cluster, 2),
    )
    .await
    .expect("failed to create control plane");

    let ctx = context(&client);
    let key = ObjectKey::new(TEST_NAMESPACE, cp_name);
    reconcile_until(&client, cluster_name, &key, &ctx, |m| m.len() == 2).await;

    let mut before = machines(&client, cluster_name).await;
    before.sort_by_key(|m| m.creation_timestamp());
    let oldest = before[0].name_any();

    let mut cp = cps.get(cp_name).await.expect("control plane exists");
    cp.spec.replicas = 1;
    cps.replace(cp_name, &PostParams::default(), &cp)
        .await
        .expect("failed to scale down");

    reconcile_until(&client, cluster_name, &key, &ctx, |m| m.len() == 1).await;

    let remaining = machines(&client, cluster_name).await;
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].name_any(), oldest, "oldest machine removed first");

    cleanup(&client, cluster_name, cp_name).await;
}
