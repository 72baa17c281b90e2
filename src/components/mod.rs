//! Desired-state producers for the Harbor components.
//!
//! Every component is made of the same building blocks: a configuration
//! object rendered from templates, a generated secret, a service, and a
//! deployment whose pod template carries checksums of the first two so that
//! it rolls when either changes.

mod jobservice;
mod portal;
mod registry;

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

pub use crate::components::jobservice::{JobService, JobServiceSpec};
pub use crate::components::portal::Portal;
pub use crate::components::registry::{Registry, RegistrySpec};

use crate::assets::AssetProvider;
use crate::component::{Component, ComponentSpec};
use crate::controller::Context;
use crate::hash::Hash32;
use crate::object::{Kind, Object, ObjectKey};

pub const CONFIG_CHECKSUM: &str = "configuration/checksum";
pub const SECRET_CHECKSUM: &str = "secret/checksum";
pub const OPERATOR_VERSION: &str = "operator/version";

/// Image used by init containers to render configuration templates.
const INIT_IMAGE: &str = "hairyhenderson/gomplate";

fn labels_value(labels: &BTreeMap<String, String>) -> Value {
    Value::Object(
        labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn key_of<S>(owner: &Component<S>, name: &str) -> ObjectKey
where
    S: serde::Serialize + serde::de::DeserializeOwned,
{
    ObjectKey::new(&owner.metadata.namespace, name)
}

/// Configuration object holding the named templates, each under the last
/// segment of its asset name.
fn config_map(
    key: &ObjectKey,
    assets: &dyn AssetProvider,
    templates: &[&str],
) -> anyhow::Result<Object> {
    let mut data = Map::new();

    for &name in templates {
        let bytes = assets.get(name)?;
        let content = std::str::from_utf8(bytes)
            .map_err(|error| anyhow::anyhow!("template {name} is not UTF-8: {error}"))?;
        let file = name.rsplit('/').next().unwrap_or(name);
        data.insert(file.to_string(), Value::String(content.to_string()));
    }

    Ok(Object::new(Kind::CONFIG_MAP, key).with("data", Value::Object(data)))
}

/// Stable secret value tied to the identity of the owner.
fn generated_secret<S>(owner: &Component<S>, purpose: &str) -> String
where
    S: serde::Serialize + serde::de::DeserializeOwned,
{
    let material = format!(
        "{}/{}/{}",
        owner.metadata.uid, owner.metadata.namespace, owner.metadata.name
    );
    Hash32::derive(purpose, material).to_hex()
}

fn secret(key: &ObjectKey, entries: &[(&str, &str)]) -> Object {
    let data: Map<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();

    Object::new(Kind::SECRET, key)
        .with("type", json!("Opaque"))
        .with("stringData", Value::Object(data))
}

/// `ClusterIP` service selecting the pods of the component.
fn service(
    key: &ObjectKey,
    selector: &BTreeMap<String, String>,
    ports: &[(u16, u16)],
) -> Object {
    let ports: Vec<Value> = ports
        .iter()
        .map(|(port, target)| json!({ "port": port, "targetPort": target }))
        .collect();

    Object::new(Kind::SERVICE, key).with(
        "spec",
        json!({
            "ports": ports,
            "selector": labels_value(selector),
        }),
    )
}

struct Checksums {
    config: String,
    secret: String,
}

/// Deployment running `pod` with the shared metadata of the component.
fn deployment(
    key: &ObjectKey,
    ctx: &Context<'_>,
    spec: &ComponentSpec,
    labels: &BTreeMap<String, String>,
    checksums: Checksums,
    mut pod: Value,
) -> Object {
    if let Value::Object(pod) = &mut pod {
        pod.insert("automountServiceAccountToken".into(), json!(false));
        if !spec.node_selector.is_empty() {
            pod.insert("nodeSelector".into(), labels_value(&spec.node_selector));
        }
        if let Some(priority) = spec.priority {
            pod.insert("priority".into(), json!(priority));
        }
    }

    let mut body = json!({
        "selector": { "matchLabels": labels_value(labels) },
        "revisionHistoryLimit": 0,
        "template": {
            "metadata": {
                "labels": labels_value(labels),
                "annotations": {
                    CONFIG_CHECKSUM: checksums.config,
                    SECRET_CHECKSUM: checksums.secret,
                    OPERATOR_VERSION: ctx.config.operator_version,
                },
            },
            "spec": pod,
        },
    });

    if let (Some(replicas), Value::Object(body)) = (spec.replicas, &mut body) {
        body.insert("replicas".into(), json!(replicas));
    }

    Object::new(Kind::DEPLOYMENT, key)
        .with("spec", body)
        .with_labels(labels.clone())
}

/// Container rendering the templates mounted at `/workdir` into `/processed`.
fn configuration_container(templates: &[&str], env: Vec<Value>) -> Value {
    let mut mounts: Vec<Value> = templates
        .iter()
        .map(|&name| {
            let file = name.rsplit('/').next().unwrap_or(name);
            json!({
                "name": "config-template",
                "mountPath": format!("/workdir/{file}"),
                "subPath": file,
                "readOnly": true,
            })
        })
        .collect();
    mounts.push(json!({ "name": "config", "mountPath": "/processed", "readOnly": false }));

    json!({
        "name": "configuration",
        "image": INIT_IMAGE,
        "workingDir": "/workdir",
        "args": ["--input-dir", "/workdir", "--output-dir", "/processed"],
        "volumeMounts": mounts,
        "env": env,
    })
}

fn env_value(name: &str, value: impl Into<Value>) -> Value {
    json!({ "name": name, "value": value.into() })
}

fn env_secret(name: &str, secret: &str, key: &str, optional: bool) -> Value {
    json!({
        "name": name,
        "valueFrom": { "secretKeyRef": { "name": secret, "key": key, "optional": optional } },
    })
}

fn http_probe(path: &str, port: u16) -> Value {
    json!({ "httpGet": { "path": path, "port": port } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::StaticAssets;
    use crate::config::Config;

    fn owner() -> Component<ComponentSpec> {
        let mut owner = Component::new(
            Kind::new("Portal"),
            &ObjectKey::new("ns", "p"),
            ComponentSpec::default(),
        );
        owner.metadata.uid = "uid-1".into();
        owner
    }

    #[test]
    fn test_generated_secret_is_stable() {
        let owner = owner();
        let first = generated_secret(&owner, "test");
        assert_eq!(first, generated_secret(&owner, "test"));
        assert_ne!(first, generated_secret(&owner, "other"));

        let mut replaced = owner.clone();
        replaced.metadata.uid = "uid-2".into();
        assert_ne!(first, generated_secret(&replaced, "test"));
    }

    #[test]
    fn test_config_map_uses_file_names() {
        let assets = StaticAssets::new().with("portal/nginx.conf", "events {}");
        let object = config_map(&ObjectKey::new("ns", "p"), &assets, &["portal/nginx.conf"]).unwrap();
        assert_eq!(object.pointer("/data/nginx.conf"), Some(&json!("events {}")));

        assert!(config_map(&ObjectKey::new("ns", "p"), &assets, &["missing"]).is_err());
    }

    #[test]
    fn test_deployment_metadata() {
        let config = Config {
            operator_version: "1.2.3".into(),
            ..Config::default()
        };
        let assets = StaticAssets::new();
        let ctx = Context {
            config: &config,
            assets: &assets,
        };
        let spec = ComponentSpec {
            replicas: Some(3),
            node_selector: BTreeMap::from([("zone".to_string(), "a".to_string())]),
            ..ComponentSpec::default()
        };
        let labels = owner().child_labels("op");

        let object = deployment(
            &ObjectKey::new("ns", "p"),
            &ctx,
            &spec,
            &labels,
            Checksums {
                config: "c".into(),
                secret: "s".into(),
            },
            json!({ "containers": [] }),
        );

        assert_eq!(object.pointer("/spec/replicas"), Some(&json!(3)));
        assert_eq!(
            object.pointer("/spec/template/metadata/annotations/operator~1version"),
            Some(&json!("1.2.3"))
        );
        assert_eq!(
            object.pointer("/spec/template/spec/nodeSelector/zone"),
            Some(&json!("a"))
        );
        assert_eq!(
            object.pointer("/spec/selector/matchLabels/app"),
            Some(&json!("portal"))
        );
    }
}
