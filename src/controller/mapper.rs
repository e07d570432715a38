//! Mapping claim change events to IPPool reconcile requests
//!
//! A claim change only matters to the pool it draws from. The mappers here
//! are pure: a claim naming a pool yields exactly one request, anything else
//! yields none.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use tracing::trace;

use crate::crd::{has_paused_annotation, matches_watch_filter, IPAddressClaim, IPClaim, IPPool};

/// A claim against an IPPool, in either of its two shapes
#[derive(Clone, Copy, Debug)]
pub enum Claim<'a> {
    /// metal3 `IPClaim`: pool name plus optional namespace
    Ip(&'a IPClaim),
    /// Cluster API `IPAddressClaim`: pool name, always in the claim's namespace
    Address(&'a IPAddressClaim),
}

impl<'a> Claim<'a> {
    /// Name of the referenced pool, if any
    pub fn pool_name(&self) -> Option<&'a str> {
        let name = match *self {
            Claim::Ip(c) => c.spec.pool.name.as_str(),
            Claim::Address(c) => c.spec.pool_ref.name.as_str(),
        };
        (!name.is_empty()).then_some(name)
    }

    /// Namespace the referenced pool lives in
    ///
    /// An explicit pool namespace wins; otherwise the claim's own namespace.
    pub fn pool_namespace(&self) -> Option<&'a str> {
        match *self {
            Claim::Ip(c) => c
                .spec
                .pool
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .or(c.metadata.namespace.as_deref()),
            Claim::Address(c) => c.metadata.namespace.as_deref(),
        }
    }

    /// Metadata of the claim object itself
    pub fn metadata(&self) -> &'a ObjectMeta {
        match *self {
            Claim::Ip(c) => &c.metadata,
            Claim::Address(c) => &c.metadata,
        }
    }
}

/// Map a claim to a reconcile request for the pool it references
pub fn claim_to_pool(claim: Claim<'_>) -> Option<ObjectRef<IPPool>> {
    let name = claim.pool_name()?;
    let request = ObjectRef::new(name);
    Some(match claim.pool_namespace() {
        Some(ns) => request.within(ns),
        None => request,
    })
}

/// `Controller::watches` mapper for `IPClaim`
pub fn ip_claim_to_pool(claim: IPClaim) -> Option<ObjectRef<IPPool>> {
    claim_to_pool(Claim::Ip(&claim))
}

/// `Controller::watches` mapper for `IPAddressClaim`
pub fn address_claim_to_pool(claim: IPAddressClaim) -> Option<ObjectRef<IPPool>> {
    claim_to_pool(Claim::Address(&claim))
}

/// Drops events for paused objects and objects outside the watch filter
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    watch_filter: Option<String>,
}

impl EventFilter {
    /// Create a filter for the given watch-filter value (`None` admits all)
    pub fn new(watch_filter: Option<String>) -> Self {
        Self {
            watch_filter: watch_filter.filter(|v| !v.is_empty()),
        }
    }

    /// Returns true if events for the object should be processed
    pub fn admits(&self, meta: &ObjectMeta) -> bool {
        !has_paused_annotation(meta) && matches_watch_filter(meta, self.watch_filter.as_deref())
    }

    /// Filtered mapper for `IPClaim` events
    pub fn ip_claims(self) -> impl Fn(IPClaim) -> Option<ObjectRef<IPPool>> + Send + Sync {
        move |claim| {
            if !self.admits(&claim.metadata) {
                trace!(claim = ?claim.metadata.name, "ignoring filtered IPClaim event");
                return None;
            }
            ip_claim_to_pool(claim)
        }
    }

    /// Filtered mapper for `IPAddressClaim` events
    pub fn address_claims(
        self,
    ) -> impl Fn(IPAddressClaim) -> Option<ObjectRef<IPPool>> + Send + Sync {
        move |claim| {
            if !self.admits(&claim.metadata) {
                trace!(claim = ?claim.metadata.name, "ignoring filtered IPAddressClaim event");
                return None;
            }
            address_claim_to_pool(claim)
        }
    }
}
