//! Integration tests for CRD operations
//!
//! These tests tell the story of how users create and inspect IPPool and
//! IPClaim resources through the Kubernetes API.

use std::collections::BTreeMap;

use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use ippool_operator::crd::{
    AddressRange, IPClaim, IPClaimSpec, IPPool, IPPoolSpec, PoolReference,
};

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_pool(name: &str) -> IPPool {
    IPPool::new(
        name,
        IPPoolSpec {
            cluster_name: None,
            pools: vec![AddressRange {
                start: Some("192.168.0.10".to_string()),
                end: Some("192.168.0.50".to_string()),
                ..Default::default()
            }],
            pre_allocations: BTreeMap::from([("c1".to_string(), "192.168.0.11".to_string())]),
            prefix: Some(24),
            gateway: Some("192.168.0.1".to_string()),
            dns_servers: vec!["8.8.8.8".to_string()],
            name_prefix: Some("test".to_string()),
        },
    )
}

async fn cleanup_pool(client: &Client, name: &str) {
    let api: Api<IPPool> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}

// =============================================================================
// Stories
// =============================================================================

/// Story: an operator defines an address pool and reads it back unchanged
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_creates_pool() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let api: Api<IPPool> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-create-pool";
    cleanup_pool(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_pool(name))
        .await
        .expect("create pool");
    assert_eq!(created.spec, sample_pool(name).spec);

    let fetched = api.get(name).await.expect("get pool");
    assert_eq!(fetched.spec.pools.len(), 1);
    assert_eq!(
        fetched.spec.pre_allocations.get("c1").map(String::as_str),
        Some("192.168.0.11")
    );
    assert!(fetched.status.is_none());

    cleanup_pool(&client, name).await;
}

/// Story: a claim written without a pool namespace round-trips as such
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_claim_defaults_to_its_own_namespace() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let api: Api<IPClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-claim";
    let _ = api.delete(name, &DeleteParams::default()).await;

    let claim = IPClaim::new(
        name,
        IPClaimSpec {
            pool: PoolReference {
                name: "crd-create-pool".to_string(),
                namespace: None,
            },
        },
    );
    let created = api
        .create(&PostParams::default(), &claim)
        .await
        .expect("create claim");
    assert_eq!(created.spec.pool.namespace, None);

    let request = ippool_operator::controller::ip_claim_to_pool(created);
    assert_eq!(
        request,
        Some(kube::runtime::reflector::ObjectRef::new("crd-create-pool").within(TEST_NAMESPACE))
    );

    let _ = api.delete(name, &DeleteParams::default()).await;
}
