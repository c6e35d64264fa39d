//! Kubernetes access for the control plane controller
//!
//! Every read goes to the API server rather than a cache, so each reconcile
//! starts from fresh state. 404s become `None`/[`DeleteOutcome::NotFound`]
//! here; 409s become [`Error::Conflict`].

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    Cluster, LatticeControlPlane, LatticeControlPlaneStatus, Machine, ObjectKey,
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL,
};
use crate::error::is_status;
use crate::Error;

/// Result of a machine delete request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion was accepted (the machine may linger until its finalizers clear)
    Deleted,
    /// The machine was already gone
    NotFound,
}

/// Label selector matching the control plane machines of a cluster
pub fn control_plane_selector(cluster_name: &str) -> String {
    format!("{}={},{}", CLUSTER_NAME_LABEL, cluster_name, CONTROL_PLANE_LABEL)
}

/// Trait abstracting Kubernetes client operations for LatticeControlPlane
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a control plane by key, `None` if it doesn't exist
    async fn get_control_plane(&self, key: &ObjectKey)
        -> Result<Option<LatticeControlPlane>, Error>;

    /// Get a CAPI Cluster, `None` if it doesn't exist
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// List control plane machines of a cluster
    ///
    /// Matches on the cluster-name and control-plane labels.
    async fn list_control_plane_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>, Error>;

    /// Create a machine
    async fn create_machine(&self, machine: &Machine) -> Result<Machine, Error>;

    /// Request deletion of a machine
    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error>;

    /// Replace a control plane's spec and metadata
    ///
    /// The object's `resourceVersion` is the expected version; a mismatch
    /// fails with [`Error::Conflict`].
    async fn update_control_plane(
        &self,
        control_plane: &LatticeControlPlane,
    ) -> Result<LatticeControlPlane, Error>;

    /// Merge-patch a control plane's status
    ///
    /// When `resource_version` is set, the patch only applies if the object
    /// is still at that version.
    async fn patch_control_plane_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<String>,
        status: &LatticeControlPlaneStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn control_planes(&self, namespace: &str) -> Api<LatticeControlPlane> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_control_plane(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<LatticeControlPlane>, Error> {
        Ok(self.control_planes(&key.namespace).get_opt(&key.name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_control_plane_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>, Error> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&control_plane_selector(cluster_name));
        Ok(api.list(&params).await?.items)
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine, Error> {
        let namespace = machine
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("machine must have a namespace"))?;
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(api.create(&params, machine).await?)
    }

    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_status(&e, 404) => {
                debug!(machine = %name, "machine already gone");
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_control_plane(
        &self,
        control_plane: &LatticeControlPlane,
    ) -> Result<LatticeControlPlane, Error> {
        let key = control_plane.object_key()?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        match self
            .control_planes(&key.namespace)
            .replace(&key.name, &params, control_plane)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 409) => Err(Error::conflict("LatticeControlPlane", key.name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_control_plane_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<String>,
        status: &LatticeControlPlaneStatus,
    ) -> Result<(), Error> {
        let patch = status_patch(resource_version, status);
        let result = self
            .control_planes(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => {
                Err(Error::conflict("LatticeControlPlane", key.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Merge patch body for a status update
///
/// Including `metadata.resourceVersion` in a merge patch makes the API server
/// reject it with 409 if the object moved on.
fn status_patch(
    resource_version: Option<String>,
    status: &LatticeControlPlaneStatus,
) -> serde_json::Value {
    match resource_version {
        Some(rv) => serde_json::json!({
            "metadata": { "resourceVersion": rv },
            "status": status,
        }),
        None => serde_json::json!({ "status": status }),
    }
}
