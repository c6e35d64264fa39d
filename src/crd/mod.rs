//! Custom Resource Definitions for the control plane provider
//!
//! `LatticeControlPlane` is the CRD we own. `Cluster` and `Machine` are typed
//! views of the Cluster API resources we read and create.

mod capi;
mod control_plane;
mod types;

pub use capi::{
    has_paused_annotation, ApiEndpoint, Bootstrap, Cluster, ClusterSpec, ClusterStatus,
    FailureDomainSpec, Machine, MachineSpec, MachineStatus, CAPI_API_VERSION,
    CLONED_FROM_GROUPKIND_ANNOTATION, CLONED_FROM_NAME_ANNOTATION, CLUSTER_NAME_LABEL,
    CONTROL_PLANE_LABEL, PAUSED_ANNOTATION, READY_CONDITION,
};
pub use control_plane::{
    cluster_owner_reference, BootstrapConfigSpec, LatticeControlPlane, LatticeControlPlaneSpec,
    LatticeControlPlaneStatus, CONTROL_PLANE_FINALIZER,
};
pub use types::{Condition, ConditionSeverity, ConditionStatus, ObjectKey};
