//! Error types for the IPPool operator
//!
//! Recoverable conditions (pool not found, owner not ready, paused, explicit
//! requeue from the pool manager) never reach this type: they are turned into
//! scheduling decisions by the reconciler. Everything here is surfaced to the
//! controller runtime, which applies its own backoff.

use thiserror::Error;

/// Main error type for IPPool operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid resource content (e.g. an owner without a name or uid)
    #[error("validation error: {0}")]
    Validation(String),

    /// The mutation session could not snapshot or diff the object
    #[error("failed to init patch helper: {0}")]
    PatchHelper(String),

    /// The pool manager failed and did not ask for a retry
    #[error("{context}: {source}")]
    Manager {
        /// What the reconciler was doing when the manager failed
        context: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Looking up the owning cluster failed for a reason other than absence
    #[error("failed to fetch cluster {cluster}: {source}")]
    OwnerLookup {
        /// Name of the referenced cluster
        cluster: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Failure inside a pool manager that is not an API error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a patch helper error with the given message
    pub fn patch_helper(msg: impl Into<String>) -> Self {
        Self::PatchHelper(msg.into())
    }

    /// Wrap a pool manager failure with what the reconciler was doing
    pub fn manager(context: impl Into<String>, source: Error) -> Self {
        Self::Manager {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an owner lookup failure with the referenced cluster name
    pub fn owner_lookup(cluster: impl Into<String>, source: Error) -> Self {
        Self::OwnerLookup {
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    ///
    /// Validation and patch helper errors need a change to the resource
    /// before another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation(_) => false,
            Error::PatchHelper(_) => false,
            Error::Manager { source, .. } => source.is_retryable(),
            Error::OwnerLookup { source, .. } => source.is_retryable(),
            Error::Internal(_) => true,
        }
    }

    /// Returns true if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Returns true if this is a Kubernetes 409 (optimistic concurrency conflict)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (test)"),
        reason: reason.to_string(),
        code,
    }))
}
