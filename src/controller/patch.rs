//! Scoped mutation session for a single reconciliation pass
//!
//! The fetched object is snapshotted once. All changes during the pass go to
//! an owned copy, and [`PatchSession::diff`] produces the JSON merge patches
//! (RFC 7386) that bring the stored object in line with the copy: one for the
//! main resource and one for the status subresource.

use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::Error;

/// Merge patches computed by a [`PatchSession`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPatch {
    /// Name of the patched object
    pub name: String,
    /// Namespace of the patched object
    pub namespace: Option<String>,
    /// Merge patch for everything except `status`
    pub body: Option<Value>,
    /// Merge patch for the status subresource, wrapped as `{"status": ...}`
    pub status: Option<Value>,
}

impl ObjectPatch {
    /// Returns true if nothing changed
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.status.is_none()
    }
}

/// In-memory copy of an object plus the snapshot it was taken from
pub struct PatchSession<K> {
    before: Value,
    object: K,
}

impl<K> PatchSession<K>
where
    K: Resource + Serialize,
{
    /// Snapshot `object` and open a session over it
    pub fn new(object: K) -> Result<Self, Error> {
        let before = serde_json::to_value(&object)
            .map_err(|e| Error::patch_helper(format!("failed to snapshot object: {e}")))?;
        Ok(Self { before, object })
    }

    /// The working copy
    pub fn object(&self) -> &K {
        &self.object
    }

    /// Mutable access to the working copy
    pub fn object_mut(&mut self) -> &mut K {
        &mut self.object
    }

    /// Compute the patches from the snapshot to the working copy
    pub fn diff(&self) -> Result<ObjectPatch, Error> {
        let after = serde_json::to_value(&self.object)
            .map_err(|e| Error::patch_helper(format!("failed to serialize object: {e}")))?;

        let (before_body, before_status) = split_status(&self.before);
        let (after_body, after_status) = split_status(&after);

        let status = merge_diff(&before_status, &after_status).map(|s| {
            let mut wrapper = Map::new();
            wrapper.insert("status".to_string(), s);
            Value::Object(wrapper)
        });

        Ok(ObjectPatch {
            name: self.object.name_any(),
            namespace: self.object.namespace(),
            body: merge_diff(&before_body, &after_body),
            status,
        })
    }
}

fn split_status(value: &Value) -> (Value, Value) {
    let mut body = value.clone();
    let status = body
        .as_object_mut()
        .and_then(|o| o.remove("status"))
        .unwrap_or(Value::Null);
    (body, status)
}

/// Compute a JSON merge patch turning `before` into `after`
///
/// Returns `None` if the values are equal. Removed keys become `null`;
/// arrays and scalars are replaced whole.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut patch = Map::new();
            for (key, after_value) in a {
                match b.get(key) {
                    Some(before_value) => {
                        if let Some(d) = merge_diff(before_value, after_value) {
                            patch.insert(key.clone(), d);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), after_value.clone());
                    }
                }
            }
            for key in b.keys() {
                if !a.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ => Some(after.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IPPool, IPPoolSpec, IPPoolStatus, IPPOOL_FINALIZER};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_pool() -> IPPool {
        let mut pool = IPPool::new("pool-a", IPPoolSpec::default());
        pool.metadata.namespace = Some("ns1".to_string());
        pool.metadata.resource_version = Some("42".to_string());
        pool
    }

    #[test]
    fn untouched_session_produces_empty_patch() {
        let session = PatchSession::new(sample_pool()).expect("snapshot");
        let patch = session.diff().expect("diff");
        assert!(patch.is_empty());
        assert_eq!(patch.name, "pool-a");
        assert_eq!(patch.namespace.as_deref(), Some("ns1"));
    }

    #[test]
    fn metadata_changes_land_in_body_only() {
        let mut session = PatchSession::new(sample_pool()).expect("snapshot");
        session.object_mut().metadata.finalizers = Some(vec![IPPOOL_FINALIZER.to_string()]);

        let patch = session.diff().expect("diff");
        assert_eq!(
            patch.body,
            Some(json!({"metadata": {"finalizers": [IPPOOL_FINALIZER]}}))
        );
        assert!(patch.status.is_none());
    }

    #[test]
    fn status_changes_land_in_status_only() {
        let mut session = PatchSession::new(sample_pool()).expect("snapshot");
        session.object_mut().status = Some(IPPoolStatus {
            allocations: BTreeMap::from([("c1".to_string(), "10.0.0.5".to_string())]),
            last_updated: None,
        });

        let patch = session.diff().expect("diff");
        assert!(patch.body.is_none());
        assert_eq!(
            patch.status,
            Some(json!({"status": {"allocations": {"c1": "10.0.0.5"}}}))
        );
    }

    #[test]
    fn removed_keys_become_null() {
        let before = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        let after = json!({"metadata": {"labels": {"a": "1"}}});
        assert_eq!(
            merge_diff(&before, &after),
            Some(json!({"metadata": {"labels": {"b": null}}}))
        );
    }

    #[test]
    fn arrays_are_replaced_whole() {
        let before = json!({"finalizers": ["x", "y"]});
        let after = json!({"finalizers": ["y"]});
        assert_eq!(
            merge_diff(&before, &after),
            Some(json!({"finalizers": ["y"]}))
        );
    }

    #[test]
    fn applying_the_diff_reproduces_the_working_copy() {
        let mut pool = sample_pool();
        pool.metadata.labels = Some(BTreeMap::from([("keep".to_string(), "1".to_string())]));
        pool.metadata.finalizers = Some(vec![IPPOOL_FINALIZER.to_string()]);

        let mut session = PatchSession::new(pool).expect("snapshot");
        let before = serde_json::to_value(session.object()).expect("serialize");
        {
            let obj = session.object_mut();
            obj.metadata.finalizers = None;
            obj.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("new".to_string(), "2".to_string());
            obj.spec.cluster_name = Some("c1".to_string());
        }

        let patch = session.diff().expect("diff");
        let mut patched = before;
        json_patch::merge(&mut patched, patch.body.as_ref().expect("body changed"));
        let expected = serde_json::to_value(session.object()).expect("serialize");
        assert_eq!(patched, expected);
    }
}
