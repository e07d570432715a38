//! IPPool operator - keeps metal3 IPPools in sync with the claims drawing from them
//!
//! The operator watches `IPPool` resources and the two claim shapes that
//! reference them (`IPClaim` and Cluster API `IPAddressClaim`). Each pass
//! gates on pause and ownership, asks the pool manager to reconcile
//! allocations, and guards deletion with a finalizer until every address is
//! released.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (IPPool, IPClaim, IPAddressClaim, Cluster)
//! - [`controller`] - Request mapping, gating, requeue classification and the reconcile loop
//! - [`manager`] - Pool manager trait and the built-in claim bookkeeper
//! - [`events`] - Kubernetes Event publishing
//! - [`retry`] - Backoff helpers
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod manager;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default number of pools reconciled concurrently
pub const DEFAULT_CONCURRENCY: u16 = 10;
