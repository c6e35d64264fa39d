//! Controller configuration
//!
//! All settings come from command-line flags with environment variable
//! fallbacks, so the same binary runs unchanged from a Deployment manifest or
//! a developer shell.

use std::time::Duration;

use clap::Args;

use crate::controller::{Settings, DEFAULT_FIELD_MANAGER};
use crate::Error;

/// Settings for the `controller` subcommand
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Field manager recorded on every write
    #[arg(long, env = "FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Seconds to wait before re-checking a missing owner Cluster
    #[arg(long, env = "OWNER_WAIT_SECS", default_value_t = 20)]
    pub owner_wait_secs: u64,

    /// Seconds to wait before re-checking draining machines
    #[arg(long, env = "DRAIN_WAIT_SECS", default_value_t = 30)]
    pub drain_wait_secs: u64,

    /// Maximum number of control planes reconciled in parallel
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Seed for failure domain choice and generated names
    ///
    /// Unset in production. Fixing it makes placement reproducible.
    #[arg(long, env = "RNG_SEED")]
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            owner_wait_secs: 20,
            drain_wait_secs: 30,
            concurrency: 4,
            log_json: false,
            seed: None,
        }
    }
}

impl ControllerConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.field_manager.trim().is_empty() {
            return Err(Error::validation_for_field(
                "controller",
                "field_manager",
                "field manager must not be empty",
            ));
        }
        if self.owner_wait_secs == 0 {
            return Err(Error::validation_for_field(
                "controller",
                "owner_wait_secs",
                "owner wait must be at least one second",
            ));
        }
        if self.drain_wait_secs == 0 {
            return Err(Error::validation_for_field(
                "controller",
                "drain_wait_secs",
                "drain wait must be at least one second",
            ));
        }
        if self.concurrency == 0 {
            return Err(Error::validation_for_field(
                "controller",
                "concurrency",
                "concurrency must be at least 1",
            ));
        }
        if let Some(ns) = &self.namespace {
            if ns.is_empty() {
                return Err(Error::validation_for_field(
                    "controller",
                    "namespace",
                    "namespace must not be empty when set",
                ));
            }
        }
        Ok(())
    }

    /// Requeue delays for the reconciler
    pub fn settings(&self) -> Settings {
        Settings {
            owner_wait: Duration::from_secs(self.owner_wait_secs),
            drain_wait: Duration::from_secs(self.drain_wait_secs),
        }
    }
}
