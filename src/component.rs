//! Typed view over an owning object.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::object::{Kind, Object, ObjectKey, ObjectMeta, OwnerReference};
use crate::status::ComponentStatus;

/// Annotation selecting which controller class reconciles an owner.
pub const CLASS_ANNOTATION: &str = "goharbor.io/operator-controller-class";

/// Fields shared by the spec of every component kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl ComponentSpec {
    pub fn image_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.image.as_deref().unwrap_or(default)
    }
}

/// An owning object whose `spec` is decoded into `S`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component<S> {
    pub api_version: String,
    pub kind: Kind,
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: ComponentStatus,
}

impl<S> Component<S>
where
    S: Serialize + DeserializeOwned,
{
    pub fn new(kind: Kind, key: &ObjectKey, spec: S) -> Self {
        let Object {
            api_version,
            kind,
            metadata,
            ..
        } = Object::new(kind, key);

        Self {
            api_version,
            kind,
            metadata,
            spec,
            status: ComponentStatus::default(),
        }
    }

    pub fn from_object(object: &Object) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(object)?)
    }

    pub fn to_object(&self) -> Result<Object, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Controller class the owner asks for; empty when not annotated.
    pub fn controller_class(&self) -> &str {
        self.metadata
            .annotations
            .get(CLASS_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Labels shared by every child of this component.
    pub fn child_labels(&self, operator: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("app"), self.kind.as_str().to_lowercase()),
            (String::from("harbor"), self.metadata.name.clone()),
            (String::from("operator"), operator.to_string()),
        ])
    }

    /// Reference making this component the controlling owner of a child.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Spec {
        #[serde(flatten)]
        component: ComponentSpec,
        #[serde(rename = "coreURL")]
        core_url: String,
    }

    #[test]
    fn test_decode_owner() {
        let raw = json!({
            "apiVersion": "goharbor.io/v1alpha2",
            "kind": "JobService",
            "metadata": {
                "name": "js",
                "namespace": "ns",
                "uid": "u-1",
                "generation": 4,
                "annotations": { "goharbor.io/operator-controller-class": "blue" }
            },
            "spec": { "replicas": 2, "coreURL": "http://core" },
            "status": {
                "observedGeneration": 3,
                "conditions": [{ "type": "Applied", "status": "True" }]
            }
        });
        let object: Object = serde_json::from_value(raw).unwrap();

        let component = Component::<Spec>::from_object(&object).unwrap();
        assert_eq!(component.spec.component.replicas, Some(2));
        assert_eq!(component.spec.core_url, "http://core");
        assert_eq!(component.status.observed_generation, 3);
        assert_eq!(component.controller_class(), "blue");

        let owner = component.owner_reference();
        assert_eq!(owner.uid, "u-1");
        assert!(owner.controller && owner.block_owner_deletion);

        let back = component.to_object().unwrap();
        assert_eq!(back.pointer("/status/observedGeneration"), Some(&json!(3)));
        assert_eq!(back.metadata.generation, 4);
    }

    #[test]
    fn test_missing_status_defaults() {
        let object = Object::new(Kind::new("Portal"), &ObjectKey::new("ns", "p"))
            .with("spec", json!({}));

        let component = Component::<ComponentSpec>::from_object(&object).unwrap();
        assert!(component.status.conditions.is_empty());
        assert_eq!(component.controller_class(), "");
    }
}
