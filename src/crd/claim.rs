//! Claim resources that reference an IPPool
//!
//! Two claim shapes exist: the metal3 `IPClaim`, which points at its pool by
//! name and optional namespace, and the Cluster API `IPAddressClaim`, which
//! uses a typed local reference and is always resolved in its own namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an IPClaim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ipam.metal3.io",
    version = "v1alpha1",
    kind = "IPClaim",
    plural = "ipclaims",
    shortname = "ipc",
    status = "IPClaimStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.pool.name"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.address"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPClaimSpec {
    /// The pool this claim draws from
    #[serde(default)]
    pub pool: PoolReference,
}

/// Reference from an IPClaim to its pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolReference {
    /// Pool name
    #[serde(default)]
    pub name: String,
    /// Pool namespace; defaults to the claim's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state of an IPClaim
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPClaimStatus {
    /// Address bound to this claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Last allocation error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Specification for a Cluster API IPAddressClaim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "IPAddressClaim",
    plural = "ipaddressclaims",
    status = "IPAddressClaimStatus",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimSpec {
    /// The pool this claim draws from
    #[serde(default)]
    pub pool_ref: TypedPoolReference,
}

/// Typed local reference from an IPAddressClaim to its pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypedPoolReference {
    /// API group of the pool kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    /// Pool kind
    #[serde(default)]
    pub kind: String,
    /// Pool name
    #[serde(default)]
    pub name: String,
}

/// Observed state of an IPAddressClaim
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimStatus {
    /// Reference to the IPAddress object created for this claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_ref: Option<AddressReference>,
}

/// Local reference to an address object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AddressReference {
    /// Object name
    #[serde(default)]
    pub name: String,
}
