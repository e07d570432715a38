//! IPPool Custom Resource Definition
//!
//! An IPPool describes one or more address ranges and records which claim
//! holds which address. The pool may be scoped to a Cluster API cluster via
//! `spec.clusterName`.

use std::collections::BTreeMap;

use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    has_paused_annotation, Cluster, CLUSTER_NAME_LABEL, IPPOOL_FINALIZER, PROVIDER_NAME,
    PROVIDER_NAME_LABEL,
};
use crate::Error;

/// Specification for an IPPool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ipam.metal3.io",
    version = "v1alpha1",
    kind = "IPPool",
    plural = "ippools",
    shortname = "ipp",
    status = "IPPoolStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolSpec {
    /// Name of the Cluster API cluster this pool belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Address ranges handed out by this pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<AddressRange>,

    /// Reserved addresses, keyed by claim (`<name>`, `<namespace>/<name>` or `IPAddressClaim/<name>`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pre_allocations: BTreeMap<String, String>,

    /// Default prefix length for addresses from this pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u8>,

    /// Default gateway for addresses from this pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Default DNS servers for addresses from this pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,

    /// Prefix used when naming objects derived from this pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}

/// A contiguous range of addresses
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressRange {
    /// First address of the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Last address of the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Subnet in CIDR notation, used when start/end are not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Prefix length override for this range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u8>,
    /// Gateway override for this range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// DNS servers override for this range
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
}

/// Observed state of an IPPool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolStatus {
    /// Addresses currently held, keyed like `pre_allocations`
    #[serde(default)]
    pub allocations: BTreeMap<String, String>,

    /// When the allocations were last reconciled (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl IPPool {
    /// Name of the owning cluster, if one is declared
    ///
    /// An empty `clusterName` counts as no owner.
    pub fn owner_cluster_name(&self) -> Option<&str> {
        self.spec.cluster_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Returns true once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the pool carries the paused annotation
    pub fn is_paused(&self) -> bool {
        has_paused_annotation(&self.metadata)
    }

    /// Returns true if the pool carries the IPPool finalizer
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == IPPOOL_FINALIZER)
    }

    /// Add the IPPool finalizer if it is missing
    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.finalizers_mut().push(IPPOOL_FINALIZER.to_string());
        }
    }

    /// Remove the IPPool finalizer if present, leaving other finalizers alone
    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != IPPOOL_FINALIZER);
            if finalizers.is_empty() {
                self.metadata.finalizers = None;
            }
        }
    }

    /// Label the pool with its owning cluster and provider
    pub fn stamp_owner_labels(&mut self, cluster_name: &str) {
        let labels = self.labels_mut();
        labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());
        labels.insert(PROVIDER_NAME_LABEL.to_string(), PROVIDER_NAME.to_string());
    }

    /// Record `cluster` as an owner of this pool
    ///
    /// An existing reference to the same cluster is replaced in place; other
    /// owner references are kept.
    pub fn set_owner_reference(&mut self, cluster: &Cluster) -> Result<(), Error> {
        let owner = cluster.owner_ref(&()).ok_or_else(|| {
            Error::validation(format!(
                "cluster {} has no name or uid, cannot own IPPool {}",
                cluster.name_any(),
                self.name_any()
            ))
        })?;

        let refs = self.owner_references_mut();
        match refs
            .iter_mut()
            .find(|r| r.uid == owner.uid || (r.kind == owner.kind && r.name == owner.name))
        {
            Some(existing) => *existing = owner,
            None => refs.push(owner),
        }
        Ok(())
    }
}
