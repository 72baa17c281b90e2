//! Mutate functions: how a live object is reconciled toward a desired one.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::object::{Kind, Object, OwnerReference};

/// Body fields the API server fills in and that must survive an update.
fn server_managed(kind: &Kind) -> &'static [&'static str] {
    match kind.as_str() {
        "Service" => &[
            "/spec/clusterIP",
            "/spec/clusterIPs",
            "/spec/healthCheckNodePort",
        ],
        _ => &[],
    }
}

/// Default merge.
///
/// Starts from the desired object and carries over from the live one what the
/// reconciler does not own: server-assigned identity, `status`, labels,
/// annotations and owner references set by others, and server-managed fields
/// of the kind.
pub fn merge(existing: Option<&Object>, desired: &Object) -> Object {
    let Some(existing) = existing else {
        return desired.clone();
    };

    let mut object = desired.clone();

    let meta = &mut object.metadata;
    meta.uid = existing.metadata.uid.clone();
    meta.generation = existing.metadata.generation;
    meta.resource_version = existing.metadata.resource_version.clone();
    meta.creation_timestamp = existing.metadata.creation_timestamp;
    meta.deletion_timestamp = existing.metadata.deletion_timestamp;

    for (key, value) in &existing.metadata.labels {
        meta.labels.entry(key.clone()).or_insert_with(|| value.clone());
    }
    for (key, value) in &existing.metadata.annotations {
        meta.annotations
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    let foreign: Vec<_> = existing
        .metadata
        .owner_references
        .iter()
        .filter(|owner| !meta.owner_references.iter().any(|o| o.uid == owner.uid))
        .cloned()
        .collect();
    meta.owner_references.splice(0..0, foreign);

    object.body.remove("status");
    if let Some(status) = existing.body.get("status") {
        object.body.insert("status".to_string(), status.clone());
    }

    for pointer in server_managed(&existing.kind) {
        if object.pointer(pointer).is_none()
            && let Some(value) = existing.pointer(pointer)
        {
            set_pointer(&mut object, pointer, value.clone());
        }
    }

    object
}

fn set_pointer(object: &mut Object, pointer: &str, value: Value) {
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let Some((head, parents)) = parents.split_first() else {
        object.body.insert(last.to_string(), value);
        return;
    };

    let mut current = object
        .body
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));

    for segment in parents {
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

/// Ownership metadata stamped on every child so that garbage collection
/// removes it together with its owner.
#[derive(Debug, Clone)]
pub struct Ownership {
    pub owner: OwnerReference,
    pub labels: BTreeMap<String, String>,
}

impl Ownership {
    pub fn stamp(&self, object: &mut Object) {
        object.metadata.labels.extend(self.labels.clone());

        let refs = &mut object.metadata.owner_references;
        match refs.iter_mut().find(|o| o.uid == self.owner.uid) {
            Some(existing) => *existing = self.owner.clone(),
            None => refs.push(self.owner.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKey;
    use serde_json::json;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "goharbor.io/v1alpha2".into(),
            kind: Kind::new("Registry"),
            name: "reg".into(),
            uid: uid.into(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    #[test]
    fn test_merge_without_existing_is_desired() {
        let desired = Object::new(Kind::SECRET, &ObjectKey::new("ns", "s"));
        assert_eq!(merge(None, &desired), desired);
    }

    #[test]
    fn test_merge_keeps_identity_and_status() {
        let key = ObjectKey::new("ns", "dep");
        let mut live = Object::new(Kind::DEPLOYMENT, &key)
            .with("spec", json!({ "replicas": 1 }))
            .with("status", json!({ "availableReplicas": 1 }))
            .with_labels([("team", "infra")]);
        live.metadata.uid = "abc".into();
        live.metadata.resource_version = Some("42".into());
        live.metadata.generation = 3;

        let desired = Object::new(Kind::DEPLOYMENT, &key)
            .with("spec", json!({ "replicas": 2 }))
            .with_labels([("app", "registry")]);

        let merged = merge(Some(&live), &desired);
        assert_eq!(merged.metadata.uid, "abc");
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(merged.metadata.generation, 3);
        assert_eq!(merged.pointer("/spec/replicas"), Some(&json!(2)));
        assert_eq!(merged.pointer("/status/availableReplicas"), Some(&json!(1)));
        assert_eq!(merged.metadata.labels["team"], "infra");
        assert_eq!(merged.metadata.labels["app"], "registry");
    }

    #[test]
    fn test_stamp_is_idempotent() {
        let ownership = Ownership {
            owner: owner("uid-1"),
            labels: BTreeMap::from([("operator".to_string(), "harbor".to_string())]),
        };
        let mutate = |existing: Option<&Object>, desired: &Object| {
            let mut object = merge(existing, desired);
            ownership.stamp(&mut object);
            object
        };

        let desired = Object::new(Kind::CONFIG_MAP, &ObjectKey::new("ns", "cm"));
        let first = mutate(None, &desired);
        let second = mutate(Some(&first), &desired);

        assert_eq!(first, second);
        assert_eq!(second.metadata.owner_references.len(), 1);
        assert_eq!(second.metadata.labels["operator"], "harbor");
    }

    #[test]
    fn test_foreign_owner_is_kept() {
        let key = ObjectKey::new("ns", "cm");
        let mut live = Object::new(Kind::CONFIG_MAP, &key);
        live.metadata.owner_references.push(owner("someone-else"));

        let ownership = Ownership {
            owner: owner("uid-1"),
            labels: BTreeMap::new(),
        };
        let mut merged = merge(Some(&live), &Object::new(Kind::CONFIG_MAP, &key));
        ownership.stamp(&mut merged);

        let uids: Vec<_> = merged
            .metadata
            .owner_references
            .iter()
            .map(|o| o.uid.as_str())
            .collect();
        assert_eq!(uids, vec!["someone-else", "uid-1"]);
    }
}
