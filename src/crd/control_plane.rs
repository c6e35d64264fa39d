//! LatticeControlPlane Custom Resource Definition
//!
//! A LatticeControlPlane declares how many control plane machines a Cluster API
//! cluster should run and which templates they are built from. It satisfies the
//! CAPI control plane provider contract (`replicas`, `selector`, `ready`,
//! `initialized` in status, scale subresource).

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::capi::{has_paused_annotation, CAPI_API_VERSION};
use super::types::{Condition, ObjectKey};
use crate::Error;

/// Finalizer guarding teardown of owned machines
pub const CONTROL_PLANE_FINALIZER: &str = "latticecontrolplane.controlplane.cluster.x-k8s.io";

/// Specification for a LatticeControlPlane
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "LatticeControlPlane",
    plural = "latticecontrolplanes",
    shortname = "lcp",
    status = "LatticeControlPlaneStatus",
    derive = "PartialEq",
    namespaced,
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LatticeControlPlaneSpec {
    /// Desired number of control plane machines
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Kubernetes version for new machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Infrastructure machine template cloned for every new machine
    pub machine_template: ObjectReference,

    /// Bootstrap configuration stamped out for every new machine
    pub control_plane_config: BootstrapConfigSpec,
}

fn default_replicas() -> i32 {
    1
}

/// Bootstrap config to create for each machine
///
/// The spec is opaque to us; it is copied verbatim into a new object of the
/// given kind, owned by the control plane.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfigSpec {
    /// API version of the bootstrap config kind
    pub api_version: String,

    /// Bootstrap config kind (e.g. KubeadmConfig)
    pub kind: String,

    /// Spec of the bootstrap config object
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub spec: serde_json::Value,
}

fn preserve_unknown_fields(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    schemars::schema::Schema::Object(schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    })
}

impl LatticeControlPlaneSpec {
    /// Validate the control plane specification
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        if self.replicas < 0 {
            return Err(Error::validation_for_field(
                name,
                "spec.replicas",
                format!("must be >= 0, got {}", self.replicas),
            ));
        }
        let template = &self.machine_template;
        if template.api_version.as_deref().unwrap_or_default().is_empty()
            || template.kind.as_deref().unwrap_or_default().is_empty()
            || template.name.as_deref().unwrap_or_default().is_empty()
        {
            return Err(Error::validation_for_field(
                name,
                "spec.machineTemplate",
                "apiVersion, kind and name are required",
            ));
        }
        if self.control_plane_config.api_version.is_empty()
            || self.control_plane_config.kind.is_empty()
        {
            return Err(Error::validation_for_field(
                name,
                "spec.controlPlaneConfig",
                "apiVersion and kind are required",
            ));
        }
        Ok(())
    }
}

/// Status for a LatticeControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatticeControlPlaneStatus {
    /// Conditions: MachinesReady, Resized, MachinesCreated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed number of control plane machines
    #[serde(default)]
    pub replicas: i32,

    /// Machines reporting Ready=True
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines not (yet) ready
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Label selector for owned machines, in string form for the scale subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Set once the first machine became ready; never unset
    #[serde(default)]
    pub initialized: bool,

    /// At least one control plane machine is ready
    #[serde(default)]
    pub ready: bool,

    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl LatticeControlPlane {
    /// Reconcile key for this object
    pub fn object_key(&self) -> Result<ObjectKey, Error> {
        let namespace = self.namespace().ok_or_else(|| {
            Error::validation_for_field(
                self.name_any(),
                "metadata.namespace",
                "LatticeControlPlane must be namespaced",
            )
        })?;
        Ok(ObjectKey::new(namespace, self.name_any()))
    }

    /// Whether our finalizer is installed
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CONTROL_PLANE_FINALIZER)
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether this object carries the CAPI paused annotation
    pub fn is_paused(&self) -> bool {
        has_paused_annotation(self.annotations())
    }

    /// Name of the owning CAPI Cluster, from owner references
    ///
    /// Returns None until CAPI's cluster controller has adopted this object.
    pub fn owner_cluster_name(&self) -> Option<String> {
        self.owner_references()
            .iter()
            .find(|r| r.kind == "Cluster" && api_group(&r.api_version) == "cluster.x-k8s.io")
            .map(|r| r.name.clone())
    }

    /// Owner reference for resources created on behalf of this control plane
    ///
    /// With `controller` set this claims the resource (machines). Without it,
    /// the resource can later be claimed by another controller (cloned
    /// infrastructure is adopted by its Machine). `block_owner_deletion` keeps
    /// the control plane around until the resource is garbage collected.
    pub fn owner_reference(&self, controller: bool, block_owner_deletion: bool) -> OwnerReference {
        OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            controller: controller.then_some(true),
            block_owner_deletion: block_owner_deletion.then_some(true),
        }
    }
}

/// Owner reference pointing at a CAPI Cluster
pub fn cluster_owner_reference(cluster: &super::Cluster) -> OwnerReference {
    OwnerReference {
        api_version: CAPI_API_VERSION.to_string(),
        kind: "Cluster".to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: None,
        block_owner_deletion: None,
    }
}

fn api_group(api_version: &str) -> &str {
    api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or_default()
}
