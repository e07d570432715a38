//! IPPool controller
//!
//! Claim events are mapped to pool requests, each pass is gated on pause and
//! ownership, and pool manager results are classified into scheduling
//! decisions.

pub mod gate;
pub mod mapper;
pub mod patch;
pub mod pool;
pub mod requeue;
pub mod store;

pub use gate::{evaluate_gate, DeferReason, Gate};
pub use mapper::{address_claim_to_pool, claim_to_pool, ip_claim_to_pool, Claim, EventFilter};
pub use patch::{merge_diff, ObjectPatch, PatchSession};
pub use pool::{error_policy, reconcile, Context, CONTROLLER_NAME};
pub use requeue::{classify, Classified, Outcome, REQUEUE_AFTER};
pub use store::{KubePoolStore, PoolStore, FIELD_MANAGER};
