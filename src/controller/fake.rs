//! In-memory API server for multi-call reconcile tests
//!
//! Implements both [`KubeClient`] and [`ExternalResources`] over a single
//! shared state, with resourceVersion checks on control plane writes. Machine
//! deletes either remove the machine at once or, with `hold_deletions`, only
//! stamp a deletion timestamp (as if the machine had its own finalizer).
//! With `concurrent_writer`, every machine create also bumps the control
//! plane's resourceVersion, as if another client edited it mid-reconcile.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::ResourceExt;

use super::client::{DeleteOutcome, KubeClient};
use super::fixtures;
use crate::crd::{Cluster, LatticeControlPlane, LatticeControlPlaneStatus, Machine, ObjectKey};
use crate::provisioner::{BootstrapRequest, CloneRequest, ExternalResources};
use crate::Error;

#[derive(Default)]
pub struct State {
    pub control_plane: Option<LatticeControlPlane>,
    pub cluster: Option<Cluster>,
    pub machines: Vec<Machine>,
    pub hold_deletions: bool,
    pub concurrent_writer: bool,
    pub creates: usize,
    pub deletes: Vec<String>,
    pub duplicate_deletes: Vec<String>,
    pub finalizer_released_with_machines: bool,
    clock: i64,
    version: u64,
}

#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<State>>,
}

impl FakeApi {
    /// A cluster `prod` with control plane `prod-cp` and `existing` machines
    pub fn new(replicas: i32, existing: usize) -> Self {
        let api = Self::default();
        {
            let mut state = api.state();
            state.control_plane = Some(fixtures::control_plane(replicas));
            state.cluster = Some(fixtures::cluster());
            state.version = 1;
            for i in 0..existing {
                let machine = fixtures::running_machine(&format!("seed-{}", i), i as i64);
                state.machines.push(machine);
            }
            state.clock = existing as i64;
        }
        api
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Mark the control plane for deletion, as `kubectl delete` would
    pub fn request_deletion(&self) {
        let mut state = self.state();
        let now = Time(Utc.timestamp_opt(1_800_000_000, 0).unwrap());
        if let Some(cp) = state.control_plane.as_mut() {
            cp.metadata.deletion_timestamp = Some(now);
        }
        state.version += 1;
        let version = state.version.to_string();
        if let Some(cp) = state.control_plane.as_mut() {
            cp.metadata.resource_version = Some(version);
        }
    }

    /// Drop machines whose deletion was requested (their finalizers cleared)
    pub fn release_deleting_machines(&self) {
        self.state().machines.retain(|m| !m.is_deleting());
    }

    pub fn machine_count(&self) -> usize {
        self.state().machines.len()
    }

    fn bump(state: &mut State) -> String {
        state.version += 1;
        state.version.to_string()
    }
}

fn conflict() -> Error {
    Error::conflict("LatticeControlPlane", "prod-cp")
}

#[async_trait]
impl KubeClient for FakeApi {
    async fn get_control_plane(
        &self,
        _key: &ObjectKey,
    ) -> Result<Option<LatticeControlPlane>, Error> {
        Ok(self.state().control_plane.clone())
    }

    async fn get_cluster(&self, _namespace: &str, _name: &str) -> Result<Option<Cluster>, Error> {
        Ok(self.state().cluster.clone())
    }

    async fn list_control_plane_machines(
        &self,
        _namespace: &str,
        _cluster_name: &str,
    ) -> Result<Vec<Machine>, Error> {
        Ok(self.state().machines.clone())
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine, Error> {
        let mut state = self.state();
        state.clock += 1;
        let mut created = machine.clone();
        created.metadata.creation_timestamp =
            Some(Time(Utc.timestamp_opt(1_700_000_000 + state.clock, 0).unwrap()));
        created.metadata.uid = Some(format!("{}-uid", created.name_any()));
        state.machines.push(created.clone());
        state.creates += 1;
        if state.concurrent_writer {
            let version = Self::bump(&mut state);
            if let Some(cp) = state.control_plane.as_mut() {
                cp.metadata.resource_version = Some(version);
            }
        }
        Ok(created)
    }

    async fn delete_machine(&self, _namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
        let mut state = self.state();
        let hold = state.hold_deletions;
        let Some(index) = state.machines.iter().position(|m| m.name_any() == name) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if state.machines[index].is_deleting() {
            state.duplicate_deletes.push(name.to_string());
        }
        state.deletes.push(name.to_string());
        if hold {
            let now = Time(Utc.timestamp_opt(1_800_000_000, 0).unwrap());
            state.machines[index].metadata.deletion_timestamp = Some(now);
        } else {
            state.machines.remove(index);
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn update_control_plane(
        &self,
        control_plane: &LatticeControlPlane,
    ) -> Result<LatticeControlPlane, Error> {
        let mut state = self.state();
        let Some(current) = state.control_plane.clone() else {
            return Err(Error::internal("control plane not found"));
        };
        if current.resource_version() != control_plane.resource_version() {
            return Err(conflict());
        }

        let mut updated = control_plane.clone();
        updated.status = current.status;
        updated.metadata.resource_version = Some(Self::bump(&mut state));

        if updated.is_deleting() && updated.finalizers().is_empty() {
            if !state.machines.is_empty() {
                state.finalizer_released_with_machines = true;
            }
            state.control_plane = None;
        } else {
            state.control_plane = Some(updated.clone());
        }
        Ok(updated)
    }

    async fn patch_control_plane_status(
        &self,
        _key: &ObjectKey,
        resource_version: Option<String>,
        status: &LatticeControlPlaneStatus,
    ) -> Result<(), Error> {
        let mut state = self.state();
        let current_version = state
            .control_plane
            .as_ref()
            .and_then(|cp| cp.resource_version());
        if resource_version.is_some() && resource_version != current_version {
            return Err(conflict());
        }
        let version = Self::bump(&mut state);
        if let Some(cp) = state.control_plane.as_mut() {
            cp.status = Some(status.clone());
            cp.metadata.resource_version = Some(version);
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalResources for FakeApi {
    async fn clone_template(&self, request: &CloneRequest) -> Result<ObjectReference, Error> {
        Ok(fixtures::machine_refs::infra(&request.name))
    }

    async fn create_bootstrap_config(
        &self,
        request: &BootstrapRequest,
    ) -> Result<ObjectReference, Error> {
        Ok(fixtures::machine_refs::bootstrap(&request.name))
    }

    async fn ensure_owner_reference(
        &self,
        _target: &ObjectReference,
        _namespace: &str,
        _owner: &OwnerReference,
    ) -> Result<bool, Error> {
        Ok(true)
    }
}
