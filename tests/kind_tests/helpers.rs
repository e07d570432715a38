//! Shared setup for kind integration tests

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};

use ippool_operator::crd::{Cluster, IPAddressClaim, IPClaim, IPPool};

/// Namespace every integration test works in
pub const TEST_NAMESPACE: &str = "ippool-integration";

/// Connect to the current cluster and make sure the CRDs and test namespace exist
pub async fn ensure_test_cluster() -> Result<Client, Box<dyn std::error::Error>> {
    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    // Owned CRDs are always applied so the schema matches this build
    let params = PatchParams::apply("ippool-integration-tests").force();
    for crd in [IPPool::crd(), IPClaim::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    // Cluster API CRDs are only created when Cluster API is not installed
    for crd in [Cluster::crd(), IPAddressClaim::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        if crds.get_opt(&name).await?.is_none() {
            crds.create(&PostParams::default(), &crd).await?;
        }
    }

    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(TEST_NAMESPACE).await?.is_none() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(TEST_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces.create(&PostParams::default(), &ns).await?;
    }

    // Give the API server a moment to serve freshly created CRDs
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(client)
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}
