//! Integration tests for the IPPool reconcile loop
//!
//! The reconciler is driven directly, one pass at a time, against a real API
//! server, so each step of the finalizer protocol can be observed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::controller::Action;
use kube::Client;

use ippool_operator::controller::{reconcile, Context, REQUEUE_AFTER};
use ippool_operator::crd::{
    IPClaim, IPClaimSpec, IPPool, IPPoolSpec, PoolReference, IPPOOL_FINALIZER,
};

use super::helpers::{ensure_test_cluster, wait_for, TEST_NAMESPACE};

fn pool_with_reservation(name: &str, claim: &str, address: &str) -> IPPool {
    IPPool::new(
        name,
        IPPoolSpec {
            pre_allocations: BTreeMap::from([(claim.to_string(), address.to_string())]),
            ..Default::default()
        },
    )
}

fn claim_for(name: &str, pool: &str) -> IPClaim {
    IPClaim::new(
        name,
        IPClaimSpec {
            pool: PoolReference {
                name: pool.to_string(),
                namespace: None,
            },
        },
    )
}

async fn pass(client: &Client, pools: &Api<IPPool>, name: &str) -> Action {
    let pool = pools.get(name).await.expect("pool exists");
    let ctx = Arc::new(Context::from_client(client.clone()));
    reconcile(Arc::new(pool), ctx).await.expect("reconcile")
}

/// Story: a pool is protected by its finalizer while a claim holds an
/// address, and disappears once the claim is gone.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_pool_outlives_its_claims() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let pools: Api<IPPool> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let claims: Api<IPClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let pool_name = "lifecycle-pool";
    let claim_name = "lifecycle-claim";

    pools
        .create(
            &PostParams::default(),
            &pool_with_reservation(pool_name, claim_name, "10.10.0.5"),
        )
        .await
        .expect("create pool");
    claims
        .create(&PostParams::default(), &claim_for(claim_name, pool_name))
        .await
        .expect("create claim");

    // First pass: finalizer added, reserved address bound
    assert_eq!(pass(&client, &pools, pool_name).await, Action::await_change());
    let pool = pools.get(pool_name).await.expect("pool");
    assert!(pool.has_finalizer());
    assert_eq!(
        pool.status.as_ref().and_then(|s| s.allocations.get(claim_name)).map(String::as_str),
        Some("10.10.0.5")
    );
    let claim = claims.get(claim_name).await.expect("claim");
    assert_eq!(
        claim.status.and_then(|s| s.address).as_deref(),
        Some("10.10.0.5")
    );

    // Deletion intent while the claim still holds its address: finalizer stays
    pools
        .delete(pool_name, &DeleteParams::default())
        .await
        .expect("delete pool");
    pass(&client, &pools, pool_name).await;
    let pool = pools.get(pool_name).await.expect("pool still present");
    assert!(pool.is_deleting());
    assert!(pool.has_finalizer());

    // Claim released: the next pass removes the finalizer and the pool goes away
    claims
        .delete(claim_name, &DeleteParams::default())
        .await
        .expect("delete claim");
    let claims_ref = &claims;
    let gone = wait_for(Duration::from_secs(10), move || async move {
        claims_ref.get_opt(claim_name).await.ok().flatten().is_none()
    })
    .await;
    assert!(gone, "claim should be deleted");

    pass(&client, &pools, pool_name).await;
    let pools_ref = &pools;
    let deleted = wait_for(Duration::from_secs(10), move || async move {
        pools_ref.get_opt(pool_name).await.ok().flatten().is_none()
    })
    .await;
    assert!(deleted, "pool should be deleted once its finalizer is removed");
}

/// Story: a pool scoped to a cluster that does not exist yet waits for it
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_pool_waits_for_its_cluster() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let pools: Api<IPPool> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "orphan-pool";

    let pool = IPPool::new(
        name,
        IPPoolSpec {
            cluster_name: Some("not-created-yet".to_string()),
            ..Default::default()
        },
    );
    pools
        .create(&PostParams::default(), &pool)
        .await
        .expect("create pool");

    assert_eq!(pass(&client, &pools, name).await, Action::requeue(REQUEUE_AFTER));
    let pool = pools.get(name).await.expect("pool");
    assert!(
        !pool
            .metadata
            .finalizers
            .unwrap_or_default()
            .iter()
            .any(|f| f == IPPOOL_FINALIZER),
        "no business logic runs before the owner exists"
    );

    let _ = pools.delete(name, &DeleteParams::default()).await;
}
