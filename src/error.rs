//! Error types for the control plane operator
//!
//! Errors are structured with fields to aid debugging in production. Kubernetes
//! "not found" responses are converted to `Option::None` (or
//! [`DeleteOutcome::NotFound`](crate::controller::DeleteOutcome)) at the client
//! boundary, so they never reach the reconciler as errors. Everything else
//! bubbles up to [`error_policy`](crate::controller::error_policy), which picks
//! a backoff.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for control plane operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error (network, availability, unexpected status)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic concurrency conflict: the object changed since it was read
    #[error("conflict updating {kind} {name}: object was modified")]
    Conflict {
        /// Kind of the object that was being written
        kind: String,
        /// Name of the object that was being written
        name: String,
    },

    /// Machine provisioning failed (template clone or machine creation)
    #[error("provisioning failed [{reason}]: {message}")]
    Provisioning {
        /// Condition reason recorded on the control plane
        reason: String,
        /// Description of what failed
        message: String,
    },

    /// Desired/observed accounting reached a state that should be impossible
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant
        message: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {name}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        name: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.replicas")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The reconciliation was cancelled before it could mutate anything
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "provisioner", "controller")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for the given object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a provisioning error carrying the condition reason to record
    pub fn provisioning(reason: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            reason: reason.into(),
            message: msg.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without object context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            name: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context and field path
    pub fn validation_for_field(
        name: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            name: name.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Whether re-invoking reconciliation may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. }
            | Self::Conflict { .. }
            | Self::Provisioning { .. }
            | Self::Cancelled
            | Self::Internal { .. } => true,
            Self::InvariantViolation { .. }
            | Self::Validation { .. }
            | Self::Serialization { .. } => false,
        }
    }
}

/// Check whether a kube error is an API error with the given HTTP status code
pub(crate) fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}
