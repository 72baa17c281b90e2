use async_trait::async_trait;
use serde_json::json;

use crate::component::{Component, ComponentSpec};
use crate::components::{Checksums, config_map, deployment, http_probe, key_of, service};
use crate::controller::{Application, Context};
use crate::object::Kind;
use crate::resource::Resource;

const IMAGE: &str = "goharbor/harbor-portal:v2.0.0";
const TEMPLATES: [&str; 1] = ["portal/nginx.conf"];
const PORT: u16 = 8080;

/// Web UI of Harbor, served by nginx.
#[derive(Debug, Default)]
pub struct Portal;

#[async_trait]
impl Application for Portal {
    type Spec = ComponentSpec;

    fn kind(&self) -> Kind {
        Kind::from_static("Portal")
    }

    async fn desired_children(
        &self,
        ctx: &Context<'_>,
        owner: &Component<ComponentSpec>,
    ) -> anyhow::Result<Vec<Resource>> {
        let name = owner.metadata.name.as_str();
        let key = key_of(owner, name);
        let labels = owner.child_labels(&ctx.config.operator_name);

        let config = config_map(&key, ctx.assets, &TEMPLATES)?;
        let checksums = Checksums {
            config: ctx.assets.checksum(&TEMPLATES)?.to_hex(),
            secret: String::new(),
        };

        let pod = json!({
            "volumes": [{ "name": "config", "configMap": { "name": name } }],
            "containers": [{
                "name": "portal",
                "image": owner.spec.image_or(IMAGE),
                "imagePullPolicy": "Always",
                "ports": [{ "containerPort": PORT }],
                "volumeMounts": [{
                    "name": "config",
                    "mountPath": "/etc/nginx/nginx.conf",
                    "subPath": "nginx.conf",
                }],
                "livenessProbe": http_probe("/", PORT),
                "readinessProbe": http_probe("/", PORT),
            }],
        });

        let workload = deployment(&key, ctx, &owner.spec, &labels, checksums, pod);
        let exposed = service(&key_of(owner, &format!("{name}-portal")), &labels, &[(80, PORT)]);

        Ok(vec![
            Resource::new(config.with_labels(labels.clone())),
            Resource::new(exposed.with_labels(labels.clone())),
            Resource::new(workload),
        ])
    }
}
