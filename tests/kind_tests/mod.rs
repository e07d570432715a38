//! Integration tests for the IPPool operator
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! operators interact with IPPools in real-world scenarios.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading and deleting IPPool and
//!   IPClaim resources through the Kubernetes API
//!
//! - `pool_lifecycle`: Stories about how the reconciler guards a pool with its
//!   finalizer, tracks claims, and lets the pool go once every address is free
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! cargo test --test kind pool_lifecycle -- --ignored --nocapture
//! ```

mod crd_operations;
mod helpers;
mod pool_lifecycle;
