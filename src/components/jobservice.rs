use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::component::{Component, ComponentSpec};
use crate::components::{
    Checksums, config_map, configuration_container, deployment, env_secret, env_value,
    generated_secret, http_probe, key_of, secret, service,
};
use crate::controller::{Application, Context};
use crate::hash::Hash32;
use crate::object::Kind;
use crate::resource::Resource;

const IMAGE: &str = "goharbor/harbor-jobservice:v2.0.0";
const TEMPLATES: [&str; 1] = ["jobservice/config.yaml"];
const PORT: u16 = 8080;
const SECRET_KEY: &str = "secret";

fn default_workers() -> u32 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    String::from("info")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(rename = "coreURL")]
    pub core_url: String,
    /// Secret holding the `secret` shared with core.
    pub core_secret: String,
    /// Secret exposing the redis connection as environment variables.
    pub redis_secret: String,
    #[serde(default = "default_workers")]
    pub worker_count: u32,
    #[serde(default = "default_retries")]
    pub web_hook_max_retry: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Asynchronous job runner of Harbor.
#[derive(Debug, Default)]
pub struct JobService;

#[async_trait]
impl Application for JobService {
    type Spec = JobServiceSpec;

    fn kind(&self) -> Kind {
        Kind::from_static("JobService")
    }

    async fn desired_children(
        &self,
        ctx: &Context<'_>,
        owner: &Component<JobServiceSpec>,
    ) -> anyhow::Result<Vec<Resource>> {
        let spec = &owner.spec;
        let name = owner.metadata.name.as_str();
        let key = key_of(owner, name);
        let labels = owner.child_labels(&ctx.config.operator_name);

        if spec.worker_count == 0 {
            anyhow::bail!("workerCount must be positive");
        }

        let config = config_map(&key, ctx.assets, &TEMPLATES)?;
        let own_secret = secret(
            &key,
            &[(SECRET_KEY, &generated_secret(owner, "jobservice secret"))],
        );

        let checksums = Checksums {
            config: ctx.assets.checksum(&TEMPLATES)?.to_hex(),
            secret: Hash32::hash_parts([spec.core_secret.as_str(), spec.redis_secret.as_str()])
                .to_hex(),
        };

        let init_env = vec![
            env_value("LOG_LEVEL", spec.log_level.as_str()),
            env_value("WEBHOOK_MAX_RETRY", spec.web_hook_max_retry.to_string()),
        ];

        let pod = json!({
            "volumes": [
                { "name": "config", "emptyDir": {} },
                { "name": "config-template", "configMap": { "name": name } },
            ],
            "initContainers": [configuration_container(&TEMPLATES, init_env)],
            "containers": [{
                "name": "jobservice",
                "image": spec.component.image_or(IMAGE),
                "args": ["-c", "/etc/jobservice/config.yaml"],
                "ports": [{ "containerPort": PORT }],
                "env": [
                    env_secret("CORE_SECRET", &spec.core_secret, "secret", false),
                    env_secret("JOBSERVICE_SECRET", name, SECRET_KEY, false),
                    env_value("CORE_URL", spec.core_url.as_str()),
                    env_value("JOB_SERVICE_POOL_WORKERS", spec.worker_count.to_string()),
                ],
                "envFrom": [{ "secretRef": { "name": spec.redis_secret } }],
                "volumeMounts": [{ "name": "config", "mountPath": "/etc/jobservice" }],
                "livenessProbe": http_probe("/api/v1/stats", PORT),
                "readinessProbe": http_probe("/api/v1/stats", PORT),
            }],
        });

        let workload = deployment(&key, ctx, &spec.component, &labels, checksums, pod);

        Ok(vec![
            Resource::new(config.with_labels(labels.clone())),
            Resource::new(own_secret.with_labels(labels.clone())),
            Resource::new(service(&key, &labels, &[(80, PORT)]).with_labels(labels.clone())),
            Resource::new(workload),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::apply::ApplyEngine;
    use crate::assets::StaticAssets;
    use crate::config::Config;
    use crate::object::ObjectKey;
    use crate::store::MemoryStore;

    fn spec() -> JobServiceSpec {
        serde_json::from_value(json!({
            "coreURL": "http://core",
            "coreSecret": "core",
            "redisSecret": "redis",
        }))
        .unwrap()
    }

    async fn children(spec: JobServiceSpec) -> anyhow::Result<Vec<Resource>> {
        let config = Config::default();
        let assets = StaticAssets::builtin();
        let ctx = Context {
            config: &config,
            assets: &assets,
        };
        let owner = Component::new(JobService.kind(), &ObjectKey::new("ns", "js"), spec);

        JobService.desired_children(&ctx, &owner).await
    }

    #[test]
    fn test_spec_defaults() {
        let spec = spec();
        assert_eq!(spec.worker_count, 10);
        assert_eq!(spec.web_hook_max_retry, 3);
        assert_eq!(spec.log_level, "info");
    }

    #[tokio::test]
    async fn test_zero_workers_is_rejected() {
        let error = children(JobServiceSpec {
            worker_count: 0,
            ..spec()
        })
        .await
        .unwrap_err();

        assert!(error.to_string().contains("workerCount"));
    }

    #[tokio::test]
    async fn test_deployment_waits_for_config_and_secret() {
        let store = Arc::new(MemoryStore::new());
        let engine = ApplyEngine::new(store, 4);
        let graph = engine.plan(children(spec()).await.unwrap()).unwrap();

        let order = graph.topological_order().unwrap();
        let position = |label: &str| {
            order
                .iter()
                .position(|&handle| {
                    graph.resource(handle).map(Resource::label).as_deref() == Some(label)
                })
                .unwrap()
        };

        assert!(position("ConfigMap/ns/js") < position("Deployment/ns/js"));
        assert!(position("Secret/ns/js") < position("Deployment/ns/js"));
    }
}
