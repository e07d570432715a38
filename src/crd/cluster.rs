//! Cluster API `Cluster`, the optional owner of an IPPool
//!
//! Only the fields the reconciler reads are modelled; unknown fields are
//! ignored on deserialization. The operator never writes Clusters.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::has_paused_annotation;

/// The subset of the Cluster API cluster spec used for pause propagation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses reconciliation of the cluster and everything scoped to it
    #[serde(default)]
    pub paused: bool,
}

impl Cluster {
    /// Returns true if the cluster is paused by spec or by annotation
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(&self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PAUSED_ANNOTATION;
    use std::collections::BTreeMap;

    #[test]
    fn paused_by_spec_or_annotation() {
        let mut cluster = Cluster::new("c1", ClusterSpec::default());
        assert!(!cluster.is_paused());

        cluster.spec.paused = true;
        assert!(cluster.is_paused());

        cluster.spec.paused = false;
        cluster.metadata.annotations = Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        assert!(cluster.is_paused());
    }

    #[test]
    fn unknown_cluster_fields_are_ignored() {
        let cluster: Cluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "Cluster",
            "metadata": {"name": "c1", "namespace": "ns1", "uid": "1234"},
            "spec": {
                "paused": true,
                "controlPlaneEndpoint": {"host": "10.0.0.1", "port": 6443},
                "infrastructureRef": {"kind": "Metal3Cluster", "name": "c1"}
            }
        }))
        .expect("cluster with extra fields");
        assert!(cluster.is_paused());
    }
}
