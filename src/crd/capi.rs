//! Typed views of the Cluster API objects this provider reads and writes
//!
//! Only the fields the control plane provider touches are modelled; unknown
//! fields are ignored on read. The `Cluster` is read-only from our side.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::conditions;

/// API group/version of core Cluster API types
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Label carrying the owning cluster's name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking a machine as a control plane member (value is empty)
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation pausing reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Annotation recording the template a resource was cloned from
pub const CLONED_FROM_NAME_ANNOTATION: &str = "cluster.x-k8s.io/cloned-from-name";

/// Annotation recording the group/kind of the template a resource was cloned from
pub const CLONED_FROM_GROUPKIND_ANNOTATION: &str = "cluster.x-k8s.io/cloned-from-groupkind";

/// Condition type set on machines by the CAPI machine controller
pub const READY_CONDITION: &str = "Ready";

/// Cluster API Cluster spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Whether reconciliation of this cluster and its objects is paused
    #[serde(default)]
    pub paused: bool,

    /// Endpoint used to reach the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Reference to the control plane provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    /// Reference to the infrastructure provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Host and port of an API server endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ApiEndpoint {
    /// Hostname or IP
    #[serde(default)]
    pub host: String,
    /// TCP port
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// An endpoint is usable once both host and port are set
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Cluster API Cluster status (subset)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Whether the infrastructure provider reports the cluster infrastructure ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Failure domains reported by the infrastructure provider
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomainSpec>,

    /// Lifecycle phase reported by CAPI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// A failure domain advertised by the infrastructure provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Whether the domain is suitable for control plane machines
    #[serde(default)]
    pub control_plane: bool,

    /// Provider-specific attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
}

impl Cluster {
    /// Whether the cluster or the given annotations pause reconciliation
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(self.annotations())
    }

    /// Whether the infrastructure provider reports ready
    pub fn infrastructure_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.infrastructure_ready)
            .unwrap_or(false)
    }

    /// Names of advertised failure domains, in sorted order
    pub fn failure_domain_names(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.failure_domains.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the control plane endpoint has been populated
    pub fn control_plane_endpoint_valid(&self) -> bool {
        self.spec
            .control_plane_endpoint
            .as_ref()
            .is_some_and(ApiEndpoint::is_valid)
    }
}

/// Cluster API Machine spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning cluster
    pub cluster_name: String,

    /// Bootstrap configuration for the machine
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the cloned infrastructure machine
    pub infrastructure_ref: ObjectReference,

    /// Kubernetes version to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Failure domain to place the machine in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

/// Bootstrap section of a Machine spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Reference to the bootstrap config object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding already-rendered bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

/// Cluster API Machine status (subset)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Machine conditions (CAPI sets `Ready` as the summary)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Lifecycle phase reported by CAPI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Machine {
    /// Whether deletion has been requested for this machine
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// The machine's `Ready` condition, if reported
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| conditions::get(&s.conditions, READY_CONDITION))
    }

    /// Whether the machine reports `Ready=True`
    pub fn is_ready(&self) -> bool {
        self.ready_condition().is_some_and(Condition::is_true)
    }
}

/// Whether an annotation map carries the CAPI paused annotation
pub fn has_paused_annotation(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(PAUSED_ANNOTATION)
}
