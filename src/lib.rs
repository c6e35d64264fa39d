//! Lattice control plane provider for Cluster API
//!
//! Keeps the control plane machines of a CAPI cluster converged with the
//! replica count on its `LatticeControlPlane`, and tears them down in order
//! when the control plane is deleted.
//!
//! # Modules
//!
//! - [`crd`] - LatticeControlPlane CRD and the CAPI types it reads
//! - [`controller`] - Reconciliation engine, machine pool and teardown logic
//! - [`provisioner`] - Infrastructure template cloning and bootstrap configs
//! - [`conditions`] - Condition bookkeeping and readiness aggregation
//! - [`config`] - Controller command-line configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod provisioner;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
