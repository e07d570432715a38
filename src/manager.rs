//! Pool manager: the business operations the reconciler drives
//!
//! The reconciler owns scheduling and persistence; the manager owns what it
//! means for a pool to be in sync with its claims. [`ClaimBookkeeper`] is the
//! built-in manager. It keeps `status.allocations` in line with the claims
//! that reference the pool, releasing addresses whose claim is gone and
//! binding claims that hold a reservation in `spec.preAllocations`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::controller::mapper::{claim_to_pool, Claim};
use crate::controller::requeue::Outcome;
use crate::controller::store::FIELD_MANAGER;
use crate::crd::{Cluster, IPAddressClaim, IPClaim, IPPool, IPPoolStatus};
use crate::Error;

/// Retry delay when a claim write loses an optimistic concurrency race
pub const CONFLICT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Operations the reconciler performs on a pool
///
/// All mutations apply to the in-memory pool; the reconciler persists them
/// when the pass ends.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// Record `cluster` as an owner of the pool
    fn set_cluster_owner_ref(&self, pool: &mut IPPool, cluster: &Cluster) -> Result<(), Error>;

    /// Ensure the pool finalizer is present
    fn set_finalizer(&self, pool: &mut IPPool);

    /// Ensure the pool finalizer is absent
    fn unset_finalizer(&self, pool: &mut IPPool);

    /// Bring allocations in line with the current claims
    ///
    /// Returns the number of addresses still allocated once done. Under
    /// deletion intent no new bindings are made.
    async fn update_addresses(&self, pool: &mut IPPool) -> Outcome<usize>;
}

/// Which claim shape a [`ClaimState`] came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimKind {
    /// metal3 `IPClaim`
    Ip,
    /// Cluster API `IPAddressClaim`
    Address,
}

/// Snapshot of one claim referencing the pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimState {
    /// Claim name
    pub name: String,
    /// Claim namespace
    pub namespace: Option<String>,
    /// Claim shape
    pub kind: ClaimKind,
    /// The claim has a deletion timestamp
    pub deleting: bool,
    /// Address currently reported on the claim status
    pub address: Option<String>,
}

impl ClaimState {
    fn from_ip_claim(claim: &IPClaim) -> Self {
        Self {
            name: claim.name_any(),
            namespace: claim.namespace(),
            kind: ClaimKind::Ip,
            deleting: claim.metadata.deletion_timestamp.is_some(),
            address: claim.status.as_ref().and_then(|s| s.address.clone()),
        }
    }

    fn from_address_claim(claim: &IPAddressClaim) -> Self {
        Self {
            name: claim.name_any(),
            namespace: claim.namespace(),
            kind: ClaimKind::Address,
            deleting: claim.metadata.deletion_timestamp.is_some(),
            address: None,
        }
    }

    /// Key of this claim in `status.allocations` and `spec.preAllocations`
    ///
    /// IPClaims in the pool namespace use their bare name. IPClaims from
    /// other namespaces are `<namespace>/<name>` and IPAddressClaims are
    /// `IPAddressClaim/<name>`. Namespace names are lowercase, so the three
    /// forms never collide.
    pub fn allocation_key(&self, pool_namespace: Option<&str>) -> String {
        match self.kind {
            ClaimKind::Address => format!("{ADDRESS_CLAIM_KEY_PREFIX}{}", self.name),
            ClaimKind::Ip => match self.namespace.as_deref() {
                Some(ns) if Some(ns) != pool_namespace => format!("{ns}/{}", self.name),
                _ => self.name.clone(),
            },
        }
    }
}

const ADDRESS_CLAIM_KEY_PREFIX: &str = "IPAddressClaim/";

/// Result of planning allocations for one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    /// Allocations the pool should record, keyed by allocation key
    pub allocations: BTreeMap<String, String>,
    /// Allocation keys whose address was released
    pub released: Vec<String>,
    /// Claims that were newly bound, with their address
    pub bound: Vec<(ClaimState, String)>,
    /// Allocation keys of live claims that could not be bound
    pub unbound: Vec<String>,
}

impl AllocationPlan {
    /// Number of addresses still allocated under this plan
    pub fn remaining(&self) -> usize {
        self.allocations.len()
    }
}

/// Compute the allocations a pool should hold given its current claims
///
/// Allocations whose claim is gone or being deleted are released. When the
/// pool is not being deleted, live claims without an allocation are bound to
/// their reserved address, unless another claim already holds it. Claims
/// are identified by [`ClaimState::allocation_key`].
pub fn plan_allocations(pool: &IPPool, claims: &[ClaimState]) -> AllocationPlan {
    let pool_namespace = pool.metadata.namespace.as_deref();
    let current = pool
        .status
        .as_ref()
        .map(|s| s.allocations.clone())
        .unwrap_or_default();
    let live: Vec<(String, &ClaimState)> = claims
        .iter()
        .filter(|c| !c.deleting)
        .map(|c| (c.allocation_key(pool_namespace), c))
        .collect();
    let live_keys: BTreeSet<&str> = live.iter().map(|(key, _)| key.as_str()).collect();

    let mut plan = AllocationPlan::default();
    for (key, address) in current {
        if live_keys.contains(key.as_str()) {
            plan.allocations.insert(key, address);
        } else {
            plan.released.push(key);
        }
    }

    if pool.is_deleting() {
        return plan;
    }

    for (key, claim) in live {
        if plan.allocations.contains_key(&key) {
            continue;
        }
        match pool.spec.pre_allocations.get(&key) {
            Some(address) if !plan.allocations.values().any(|a| a == address) => {
                plan.allocations.insert(key, address.clone());
                plan.bound.push((claim.clone(), address.clone()));
            }
            _ => plan.unbound.push(key),
        }
    }
    plan
}

/// Built-in [`PoolManager`] backed by the Kubernetes API
pub struct ClaimBookkeeper {
    client: Client,
}

impl ClaimBookkeeper {
    /// Create a new manager wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Collect every claim of either shape that references `pool`
    ///
    /// IPClaims may name a pool in another namespace, so they are listed
    /// cluster-wide. IPAddressClaims always live next to their pool.
    async fn claims_for(&self, pool: &IPPool) -> Result<(Vec<ClaimState>, Vec<IPClaim>), Error> {
        let target = Some(ObjectRef::from_obj(pool));

        let ip_claims: Api<IPClaim> = Api::all(self.client.clone());
        let ip_claims: Vec<IPClaim> = ip_claims
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|c| claim_to_pool(Claim::Ip(c)) == target)
            .collect();

        let address_claims: Api<IPAddressClaim> = match pool.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        };
        let address_claims = address_claims
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|c| references_ippool(c) && claim_to_pool(Claim::Address(c)) == target);

        let mut states: Vec<ClaimState> = ip_claims.iter().map(ClaimState::from_ip_claim).collect();
        states.extend(address_claims.map(|c| ClaimState::from_address_claim(&c)));
        Ok((states, ip_claims))
    }

    async fn write_claim_address(&self, claim: &IPClaim, address: &str) -> Result<(), Error> {
        let api: Api<IPClaim> = match claim.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        };
        let patch = serde_json::json!({
            "status": { "address": address, "errorMessage": null }
        });
        api.patch_status(
            &claim.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

fn references_ippool(claim: &IPAddressClaim) -> bool {
    let pool_ref = &claim.spec.pool_ref;
    (pool_ref.kind.is_empty() || pool_ref.kind == "IPPool")
        && pool_ref
            .api_group
            .as_deref()
            .map_or(true, |g| g.is_empty() || g == "ipam.metal3.io")
}

#[async_trait]
impl PoolManager for ClaimBookkeeper {
    fn set_cluster_owner_ref(&self, pool: &mut IPPool, cluster: &Cluster) -> Result<(), Error> {
        pool.set_owner_reference(cluster)
    }

    fn set_finalizer(&self, pool: &mut IPPool) {
        pool.add_finalizer();
    }

    fn unset_finalizer(&self, pool: &mut IPPool) {
        pool.remove_finalizer();
    }

    #[instrument(skip(self, pool), fields(pool = %pool.name_any(), deleting = pool.is_deleting()))]
    async fn update_addresses(&self, pool: &mut IPPool) -> Outcome<usize> {
        let (claims, ip_claims) = match self.claims_for(pool).await {
            Ok(found) => found,
            Err(e) => return Outcome::Fatal(e),
        };

        let plan = plan_allocations(pool, &claims);
        debug!(
            claims = claims.len(),
            released = plan.released.len(),
            bound = plan.bound.len(),
            unbound = plan.unbound.len(),
            "planned allocations"
        );

        for (state, address) in &plan.bound {
            if state.kind == ClaimKind::Address {
                info!(
                    claim = %state.name,
                    %address,
                    "bound reserved address to IPAddressClaim; recorded on the pool only, no IPAddress is created"
                );
                continue;
            }
            if state.address.as_deref() == Some(address.as_str()) {
                continue;
            }
            let Some(claim) = ip_claims
                .iter()
                .find(|c| c.name_any() == state.name && c.namespace() == state.namespace)
            else {
                continue;
            };
            match self.write_claim_address(claim, address).await {
                Ok(()) => info!(claim = %state.name, namespace = ?state.namespace, %address, "bound reserved address"),
                Err(e) if e.is_conflict() => {
                    warn!(claim = %state.name, "claim changed while binding, retrying");
                    return Outcome::RetryAfter(CONFLICT_RETRY_AFTER);
                }
                Err(e) => return Outcome::Fatal(e),
            }
        }

        for key in &plan.released {
            info!(claim = %key, "released address");
        }

        let status = pool.status.get_or_insert_with(IPPoolStatus::default);
        if status.allocations != plan.allocations {
            status.allocations = plan.allocations.clone();
            status.last_updated = Some(chrono::Utc::now().to_rfc3339());
        }

        Outcome::Ready(plan.remaining())
    }
}
