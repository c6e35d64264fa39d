//! Test fixtures shared by the controller tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

use super::reconcile::ClusterContext;
use crate::crd::{
    ApiEndpoint, BootstrapConfigSpec, Cluster, ClusterSpec, ClusterStatus, Condition,
    FailureDomainSpec, LatticeControlPlane, LatticeControlPlaneSpec, LatticeControlPlaneStatus,
    Machine, MachineSpec, MachineStatus, CLUSTER_NAME_LABEL, CONTROL_PLANE_FINALIZER,
    CONTROL_PLANE_LABEL, READY_CONDITION,
};

/// Control plane `default/prod-cp`, owned by cluster `prod`, finalizer set
pub fn control_plane(replicas: i32) -> LatticeControlPlane {
    LatticeControlPlane {
        metadata: ObjectMeta {
            name: Some("prod-cp".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("cp-uid".to_string()),
            generation: Some(1),
            resource_version: Some("1".to_string()),
            finalizers: Some(vec![CONTROL_PLANE_FINALIZER.to_string()]),
            owner_references: Some(vec![OwnerReference {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "Cluster".to_string(),
                name: "prod".to_string(),
                uid: "cluster-uid".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: LatticeControlPlaneSpec {
            replicas,
            version: Some("v1.32.0".to_string()),
            machine_template: ObjectReference {
                api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".to_string()),
                kind: Some("DockerMachineTemplate".to_string()),
                name: Some("prod-cp-template".to_string()),
                ..Default::default()
            },
            control_plane_config: BootstrapConfigSpec {
                api_version: "bootstrap.cluster.x-k8s.io/v1beta1".to_string(),
                kind: "KubeadmConfig".to_string(),
                spec: serde_json::json!({}),
            },
        },
        status: None,
    }
}

/// [`control_plane`] with deletion requested
pub fn deleting_control_plane(replicas: i32) -> LatticeControlPlane {
    let mut cp = control_plane(replicas);
    cp.metadata.deletion_timestamp = Some(Time(epoch_plus(100)));
    cp.status = Some(LatticeControlPlaneStatus::default());
    cp
}

/// Ready, unpaused cluster `default/prod` with a valid endpoint and three zones
pub fn cluster() -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some("prod".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("cluster-uid".to_string()),
            ..Default::default()
        },
        spec: ClusterSpec {
            paused: false,
            control_plane_endpoint: Some(ApiEndpoint {
                host: "172.18.0.10".to_string(),
                port: 6443,
            }),
            control_plane_ref: None,
            infrastructure_ref: None,
        },
        status: Some(ClusterStatus {
            infrastructure_ready: true,
            failure_domains: ["az-3", "az-1", "az-2"]
                .into_iter()
                .map(|d| (d.to_string(), FailureDomainSpec::default()))
                .collect(),
            phase: Some("Provisioned".to_string()),
        }),
    }
}

/// Ready cluster context for `prod` with the given failure domains
pub fn cluster_context(domains: &[&str]) -> ClusterContext {
    ClusterContext {
        name: "prod".to_string(),
        infrastructure_ready: true,
        failure_domains: domains.iter().map(|d| d.to_string()).collect(),
        control_plane_endpoint_valid: true,
        paused: false,
    }
}

fn epoch_plus(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Control plane machine created at the fixture epoch, no status yet
pub fn machine(name: &str) -> Machine {
    machine_at(name, 0)
}

/// Control plane machine created `secs` after the fixture epoch
pub fn machine_at(name: &str, secs: i64) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{}-uid", name)),
            creation_timestamp: Some(Time(epoch_plus(secs))),
            labels: Some(BTreeMap::from([
                (CLUSTER_NAME_LABEL.to_string(), "prod".to_string()),
                (CONTROL_PLANE_LABEL.to_string(), String::new()),
            ])),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: "prod".to_string(),
            infrastructure_ref: machine_refs::infra(name),
            ..Default::default()
        },
        status: None,
    }
}

/// [`machine_at`] reporting `Ready=True`
pub fn running_machine(name: &str, secs: i64) -> Machine {
    let mut m = machine_at(name, secs);
    let mut ready = Condition::true_(READY_CONDITION);
    ready.last_transition_time = epoch_plus(secs + 60);
    m.status = Some(MachineStatus {
        conditions: vec![ready],
        phase: Some("Running".to_string()),
    });
    m
}

/// References returned by mocked provisioning calls
pub mod machine_refs {
    use super::*;

    /// Reference to a cloned DockerMachine
    pub fn infra(name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".to_string()),
            kind: Some("DockerMachine".to_string()),
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    /// Reference to a created KubeadmConfig
    pub fn bootstrap(name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some("bootstrap.cluster.x-k8s.io/v1beta1".to_string()),
            kind: Some("KubeadmConfig".to_string()),
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }
}

/// Captured status updates for verification without coupling to mock internals
#[derive(Clone, Default)]
pub struct StatusCapture {
    updates: Arc<Mutex<Vec<LatticeControlPlaneStatus>>>,
}

impl StatusCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: LatticeControlPlaneStatus) {
        self.updates.lock().unwrap().push(status);
    }

    pub fn last(&self) -> Option<LatticeControlPlaneStatus> {
        self.updates.lock().unwrap().last().cloned()
    }
}
