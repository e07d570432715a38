//! Pause and ownership gating
//!
//! Decides, before any business logic runs, whether a pool should be
//! reconciled now. A pool may be scoped to a Cluster API cluster; the cluster
//! may not exist yet, may be paused, or may already be gone while the pool is
//! being deleted.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info};

use super::requeue::REQUEUE_AFTER;
use super::store::PoolStore;
use crate::crd::{matches_watch_filter, Cluster, IPPool};
use crate::Error;

/// Why a pass was deferred
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferReason {
    /// The owning cluster does not exist yet
    OwnerNotFound,
    /// The pool or its owning cluster is paused
    Paused,
}

/// Gate decision for one pass
#[derive(Clone, Debug, PartialEq)]
pub enum Gate {
    /// Reconcile now; `cluster` is set when the owner resolved
    Proceed {
        /// The resolved owning cluster
        cluster: Option<Cluster>,
    },
    /// Do no business logic and try again later
    Defer {
        /// Delay before the next pass
        after: Duration,
        /// What the pass is waiting on
        reason: DeferReason,
    },
    /// The pool belongs to another controller instance; do nothing
    Skip,
}

impl Gate {
    fn defer(reason: DeferReason) -> Self {
        Gate::Defer {
            after: REQUEUE_AFTER,
            reason,
        }
    }

    fn unowned() -> Self {
        Gate::Proceed { cluster: None }
    }
}

/// Evaluate the gate for `pool`
///
/// Pause is only honoured once an owner resolved; a pool without a
/// resolvable owner always proceeds. On a resolved owner, the owner labels
/// are stamped on the in-memory pool. Owner lookup failures never block a
/// pool that is being deleted.
pub async fn evaluate_gate(
    pool: &mut IPPool,
    store: &dyn PoolStore,
    watch_filter: Option<&str>,
) -> Result<Gate, Error> {
    if !matches_watch_filter(&pool.metadata, watch_filter) {
        debug!("pool is outside the watch filter");
        return Ok(Gate::Skip);
    }

    let Some(cluster_name) = pool.owner_cluster_name().map(str::to_string) else {
        return Ok(Gate::unowned());
    };

    let lookup = store.get_cluster(&cluster_name, pool.namespace()).await;
    let cluster = match lookup {
        Ok(Some(cluster)) => cluster,
        Ok(None) if pool.is_deleting() => {
            debug!(cluster = %cluster_name, "owning cluster gone, continuing deletion");
            return Ok(Gate::unowned());
        }
        Ok(None) => {
            info!(cluster = %cluster_name, "owning cluster not found, it might not exist yet");
            return Ok(Gate::defer(DeferReason::OwnerNotFound));
        }
        Err(e) if pool.is_deleting() => {
            debug!(cluster = %cluster_name, error = %e, "owner lookup failed, continuing deletion");
            return Ok(Gate::unowned());
        }
        Err(e) => return Err(Error::owner_lookup(cluster_name, e)),
    };

    pool.stamp_owner_labels(&cluster_name);

    if pool.is_paused() || cluster.is_paused() {
        info!(cluster = %cluster_name, "reconciliation is paused for this object");
        return Ok(Gate::defer(DeferReason::Paused));
    }
    Ok(Gate::Proceed {
        cluster: Some(cluster),
    })
}
