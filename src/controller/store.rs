//! Object store access for the IPPool reconciler
//!
//! The reconciler only needs three things from the API server: read a pool,
//! read its owning cluster, and write back the merge patches of a pass.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::patch::ObjectPatch;
use crate::crd::{Cluster, IPPool};
use crate::Error;

/// Field manager used for every write made by the controller
pub const FIELD_MANAGER: &str = "ippool-controller";

/// Trait abstracting the object store operations used by the reconciler
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Fetch a pool by identity; `Ok(None)` if it does not exist
    async fn get_pool(&self, name: &str, namespace: Option<String>)
        -> Result<Option<IPPool>, Error>;

    /// Fetch a cluster by identity; `Ok(None)` if it does not exist
    async fn get_cluster(&self, name: &str, namespace: Option<String>)
        -> Result<Option<Cluster>, Error>;

    /// Apply the merge patches produced by a mutation session
    async fn patch_pool(&self, patch: &ObjectPatch) -> Result<(), Error>;
}

/// Real Kubernetes implementation of [`PoolStore`]
pub struct KubePoolStore {
    client: Client,
}

impl KubePoolStore {
    /// Create a new store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pools(&self, namespace: Option<&str>) -> Api<IPPool> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn clusters(&self, namespace: Option<&str>) -> Api<Cluster> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl PoolStore for KubePoolStore {
    async fn get_pool(
        &self,
        name: &str,
        namespace: Option<String>,
    ) -> Result<Option<IPPool>, Error> {
        Ok(self.pools(namespace.as_deref()).get_opt(name).await?)
    }

    async fn get_cluster(
        &self,
        name: &str,
        namespace: Option<String>,
    ) -> Result<Option<Cluster>, Error> {
        Ok(self.clusters(namespace.as_deref()).get_opt(name).await?)
    }

    async fn patch_pool(&self, patch: &ObjectPatch) -> Result<(), Error> {
        let api = self.pools(patch.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER);

        // Status first: removing the finalizer in the body may let the
        // object disappear before the status write lands.
        if let Some(status) = &patch.status {
            debug!(pool = %patch.name, "patching IPPool status");
            ignore_not_found(api.patch_status(&patch.name, &params, &Patch::Merge(status)).await)?;
        }
        if let Some(body) = &patch.body {
            debug!(pool = %patch.name, "patching IPPool");
            ignore_not_found(api.patch(&patch.name, &params, &Patch::Merge(body)).await)?;
        }
        Ok(())
    }
}

/// A pool that vanished between fetch and flush has nothing left to persist
fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => match Error::from(e) {
            e if e.is_not_found() => Ok(()),
            e => Err(e),
        },
    }
}
