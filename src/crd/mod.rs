//! Custom Resource Definitions used by the IPPool operator
//!
//! `IPPool` and `IPClaim` are owned by this operator. `IPAddressClaim` and
//! `Cluster` belong to Cluster API and are only read.

mod claim;
mod cluster;
mod pool;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub use claim::{
    AddressReference, IPAddressClaim, IPAddressClaimSpec, IPAddressClaimStatus, IPClaim,
    IPClaimSpec, IPClaimStatus, PoolReference, TypedPoolReference,
};
pub use cluster::{Cluster, ClusterSpec};
pub use pool::{AddressRange, IPPool, IPPoolSpec, IPPoolStatus};

/// Finalizer that keeps an IPPool around until all of its addresses are released
pub const IPPOOL_FINALIZER: &str = "ippool.ipam.metal3.io";

/// Label carrying the name of the owning cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label carrying the name of the provider that manages the object
pub const PROVIDER_NAME_LABEL: &str = "cluster.x-k8s.io/provider";

/// Value written to [`PROVIDER_NAME_LABEL`] on pools
pub const PROVIDER_NAME: &str = "ipam-metal3";

/// Annotation that pauses reconciliation of the annotated object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label used to shard objects between controller instances
pub const WATCH_FILTER_LABEL: &str = "cluster.x-k8s.io/watch-filter";

/// Returns true if the object carries the paused annotation (any value)
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Returns true if the object matches the configured watch-filter value
///
/// With no filter configured every object matches.
pub fn matches_watch_filter(meta: &ObjectMeta, filter: Option<&str>) -> bool {
    match filter {
        None | Some("") => true,
        Some(value) => meta
            .labels
            .as_ref()
            .and_then(|l| l.get(WATCH_FILTER_LABEL))
            .is_some_and(|v| v == value),
    }
}

/// Label selector restricting a watch to the configured watch-filter value
pub fn watch_filter_selector(filter: Option<&str>) -> Option<String> {
    filter
        .filter(|v| !v.is_empty())
        .map(|v| format!("{WATCH_FILTER_LABEL}={v}"))
}
