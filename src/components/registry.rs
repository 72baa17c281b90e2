use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::component::{Component, ComponentSpec};
use crate::components::{
    Checksums, config_map, configuration_container, deployment, env_secret, env_value,
    generated_secret, http_probe, key_of, secret, service,
};
use crate::controller::{Application, Context};
use crate::hash::Hash32;
use crate::object::Kind;
use crate::resource::Resource;

const IMAGE: &str = "goharbor/registry-photon:v2.0.0";
const CTL_IMAGE: &str = "goharbor/harbor-registryctl:v2.0.0";

const TEMPLATES: [&str; 2] = ["registry/config.yaml", "registry/ctl-config.yaml"];

const API_PORT: u16 = 5000;
const METRICS_PORT: u16 = 5001;
const CTL_PORT: u16 = 8080;

pub const HTTP_SECRET_KEY: &str = "REGISTRY_HTTP_SECRET";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    /// Secret holding the `secret` shared with core.
    pub core_secret: String,
    /// Config map providing `REGISTRY_HTTP_HOST`.
    #[serde(default)]
    pub config_name: String,
    /// Secret holding the redis URL used as blob descriptor cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_secret: Option<String>,
    /// Secret holding the storage driver parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret: Option<String>,
}

/// The docker distribution server and its control API.
#[derive(Debug, Default)]
pub struct Registry;

#[async_trait]
impl Application for Registry {
    type Spec = RegistrySpec;

    fn kind(&self) -> Kind {
        Kind::from_static("Registry")
    }

    async fn desired_children(
        &self,
        ctx: &Context<'_>,
        owner: &Component<RegistrySpec>,
    ) -> anyhow::Result<Vec<Resource>> {
        let spec = &owner.spec;
        let name = owner.metadata.name.as_str();
        let key = key_of(owner, name);
        let labels = owner.child_labels(&ctx.config.operator_name);

        let config = config_map(&key, ctx.assets, &TEMPLATES)?;
        let http_secret = generated_secret(owner, "registry http secret");
        let own_secret = secret(&key, &[(HTTP_SECRET_KEY, &http_secret)]);

        let secret_names = [spec.cache_secret.as_deref(), spec.storage_secret.as_deref()]
            .map(Option::unwrap_or_default);
        let checksums = Checksums {
            config: ctx.assets.checksum(&TEMPLATES)?.to_hex(),
            secret: Hash32::hash_parts(secret_names).to_hex(),
        };

        let storage = match &spec.storage_secret {
            Some(storage) => {
                json!({ "name": "config-storage", "secret": { "secretName": storage } })
            }
            None => json!({ "name": "config-storage", "emptyDir": {} }),
        };

        let mut init_env = vec![env_value("REGISTRY_HTTP_SECRET_KEY", HTTP_SECRET_KEY)];
        if !spec.config_name.is_empty() {
            init_env.push(json!({
                "name": "REGISTRY_HTTP_HOST",
                "valueFrom": {
                    "configMapKeyRef": { "name": spec.config_name, "key": "REGISTRY_HTTP_HOST" },
                },
            }));
        }

        let mut env = vec![
            env_secret("CORE_SECRET", &spec.core_secret, "secret", false),
            env_secret("REGISTRY_HTTP_SECRET", name, HTTP_SECRET_KEY, false),
            env_value("REGISTRY_LOG_FIELDS_OPERATOR", ctx.config.operator_name.as_str()),
            env_value("REGISTRY_LOG_FIELDS_HARBOR", name),
        ];
        if let Some(cache) = &spec.cache_secret {
            env.push(env_secret("REDIS_URL", cache, "url", true));
        }

        let mounts = json!([
            { "name": "config", "mountPath": "/etc/registry" },
            { "name": "config-storage", "mountPath": "/etc/registry/storage", "readOnly": true },
        ]);

        let pod = json!({
            "volumes": [
                { "name": "config", "emptyDir": {} },
                { "name": "config-template", "configMap": { "name": name } },
                storage,
            ],
            "initContainers": [configuration_container(&TEMPLATES, init_env)],
            "containers": [
                {
                    "name": "registryctl",
                    "image": CTL_IMAGE,
                    "ports": [{ "containerPort": CTL_PORT }],
                    "env": env.clone(),
                    "volumeMounts": mounts.clone(),
                    "livenessProbe": http_probe("/api/health", CTL_PORT),
                    "readinessProbe": http_probe("/api/health", CTL_PORT),
                },
                {
                    "name": "registry",
                    "image": spec.component.image_or(IMAGE),
                    "ports": [
                        { "containerPort": API_PORT },
                        { "containerPort": METRICS_PORT },
                    ],
                    "env": Value::Array(env),
                    "volumeMounts": mounts,
                    "livenessProbe": http_probe("/", API_PORT),
                    "readinessProbe": http_probe("/", API_PORT),
                },
            ],
        });

        let workload = deployment(&key, ctx, &spec.component, &labels, checksums, pod);

        Ok(vec![
            Resource::new(config.with_labels(labels.clone())),
            Resource::new(own_secret.with_labels(labels.clone())),
            Resource::new(
                service(&key, &labels, &[(API_PORT, API_PORT), (CTL_PORT, CTL_PORT)])
                    .with_labels(labels.clone()),
            ),
            Resource::new(workload),
        ])
    }
}
