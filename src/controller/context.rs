//! Shared controller context
//!
//! Holds the clients, timing settings, randomness source and cancellation
//! token. Nothing in here is per-object state: every reconcile reads what it
//! needs fresh from the API server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::Client;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use super::client::{KubeClient, KubeClientImpl};
use crate::provisioner::{ExternalResources, ExternalResourcesImpl};
use crate::Error;

/// Delay before re-checking when the owning Cluster is missing
pub const DEFAULT_OWNER_WAIT: Duration = Duration::from_secs(20);

/// Delay before re-checking teardown or scale-down progress
pub const DEFAULT_DRAIN_WAIT: Duration = Duration::from_secs(30);

/// Default field manager for writes
pub const DEFAULT_FIELD_MANAGER: &str = "lattice-control-plane";

/// Requeue delays used by the reconciler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Wait applied while the owning Cluster (or a referenced template) is missing
    pub owner_wait: Duration,
    /// Wait applied while machines are draining
    pub drain_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            owner_wait: DEFAULT_OWNER_WAIT,
            drain_wait: DEFAULT_DRAIN_WAIT,
        }
    }
}

/// Controller context shared across reconciliations
///
/// Use [`Context::builder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .field_manager("lattice-control-plane")
///     .seed(42)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for control plane, cluster and machine records
    pub kube: Arc<dyn KubeClient>,
    /// Creates infrastructure clones and bootstrap configs
    pub resources: Arc<dyn ExternalResources>,
    /// Requeue delays
    pub settings: Settings,
    /// Cancelled on shutdown; checked before every mutation
    pub cancel: CancellationToken,
    rng: Mutex<StdRng>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Run `f` with exclusive access to the randomness source
    ///
    /// Used for failure domain choice and generated names, so a seeded
    /// context produces reproducible placements.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // Poisoning is harmless here; any RNG state is valid.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Fail with [`Error::Cancelled`] if shutdown has been requested
    pub fn ensure_not_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Create a context for testing with custom mock clients
    ///
    /// Uses default settings, a fixed seed and a fresh cancellation token.
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, resources: Arc<dyn ExternalResources>) -> Self {
        Self {
            kube,
            resources,
            settings: Settings::default(),
            cancel: CancellationToken::new(),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    resources: Option<Arc<dyn ExternalResources>>,
    field_manager: String,
    settings: Settings,
    seed: Option<u64>,
    cancel: Option<CancellationToken>,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client
    fn new(client: Client) -> Self {
        Self {
            client,
            resources: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            settings: Settings::default(),
            seed: None,
            cancel: None,
        }
    }

    /// Set the field manager used for writes
    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Set requeue delays
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Seed the randomness source (defaults to OS entropy)
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Use an existing cancellation token
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the resource provisioner (primarily for testing)
    pub fn resources(mut self, resources: Arc<dyn ExternalResources>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Context {
            kube: Arc::new(KubeClientImpl::new(
                self.client.clone(),
                self.field_manager,
            )),
            resources: self
                .resources
                .unwrap_or_else(|| Arc::new(ExternalResourcesImpl::new(self.client.clone()))),
            settings: self.settings,
            cancel: self.cancel.unwrap_or_default(),
            rng: Mutex::new(rng),
        }
    }
}
