//! Controller for LatticeControlPlane
//!
//! This module contains the reconciliation logic that keeps a control plane's
//! machines converged with its desired replica count, and tears them down when
//! the control plane is deleted.

mod client;
mod context;
mod deletion;
mod machines;
mod reconcile;
mod runner;
mod status;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod fixtures;

pub use client::{control_plane_selector, DeleteOutcome, KubeClient, KubeClientImpl};
pub use context::{
    Context, ContextBuilder, Settings, DEFAULT_DRAIN_WAIT, DEFAULT_FIELD_MANAGER,
    DEFAULT_OWNER_WAIT,
};
pub use deletion::{reconcile_delete, teardown_state, TeardownState};
pub use machines::{converge, plan, select_victim, PoolAction};
pub use reconcile::{
    backoff_for, error_policy, reconcile, reconcile_key, ClusterContext, Requeue,
    IMMEDIATE_REQUEUE,
};
pub use runner::{log_reconcile_result, run, WATCH_TIMEOUT_SECS};
