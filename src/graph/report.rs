use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::error::{AggregateApplyError, ApplyError, Blocked};
use crate::graph::{Handle, ResourceGraph};
use crate::object::{Kind, ObjectKey};
use crate::resource::Outcome;

#[derive(Debug, Clone)]
pub struct Execution {
    pub start: Instant,
    pub duration: Duration,
}

/// A node that was applied successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub handle: Handle,
    pub kind: Kind,
    pub key: ObjectKey,
    pub outcome: Outcome,
}

/// Result of one apply pass over a [`ResourceGraph`].
///
/// Every node ends up in exactly one of `succeeded`, `failed` or `blocked`.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub succeeded: Vec<Applied>,
    pub failed: Vec<(Handle, ApplyError)>,
    pub blocked: Vec<(Handle, Blocked)>,
    pub execution_times: HashMap<Handle, Execution>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<Applied>, AggregateApplyError> {
        if self.is_success() {
            return Ok(self.succeeded);
        }

        Err(AggregateApplyError {
            failed: self.failed.into_iter().map(|(_, error)| error).collect(),
            blocked: self.blocked.into_iter().map(|(_, blocked)| blocked).collect(),
        })
    }

    /// Renders the graph as a Mermaid diagram coloured by the outcome of each
    /// node.
    ///
    /// * **Green**: Created or updated
    /// * **Blue**: Unchanged
    /// * **Red**: Failed
    /// * **Grey**: Blocked
    pub fn render_mermaid(&self, graph: &ResourceGraph) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        for handle in graph.handles() {
            let Some(resource) = graph.resource(handle) else {
                continue;
            };
            let name = resource.label().replace('"', "\\\"");

            let (label, color) = if let Some(applied) =
                self.succeeded.iter().find(|applied| applied.handle == handle)
            {
                match applied.outcome {
                    Outcome::Unchanged => ("Unchanged".to_string(), "#ADD8E6"),
                    outcome => (format!("{outcome:?}"), "#90EE90"),
                }
            } else if self.failed.iter().any(|(h, _)| *h == handle) {
                ("Failed".to_string(), "#FF7F7F")
            } else {
                ("Blocked".to_string(), "#D3D3D3")
            };

            let duration = self
                .execution_times
                .get(&handle)
                .map(|execution| format!(" {:.2?}", execution.duration))
                .unwrap_or_default();

            let index = handle.index();
            let _ = writeln!(f, "    {index}[\"{name}\\n{label}{duration}\"]");
            let _ = writeln!(f, "    style {index} fill:{color}");
        }

        for handle in graph.handles() {
            for dependency in graph.dependencies(handle) {
                let _ = writeln!(f, "    {} --> {}", dependency.index(), handle.index());
            }
        }

        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApplyFailure, StoreError};
    use crate::object::Object;
    use crate::resource::Resource;

    #[test]
    fn test_mermaid_colours_outcomes() {
        let key = |name: &str| ObjectKey::new("ns", name);

        let mut graph = ResourceGraph::new();
        let cm = graph
            .add_resource(Resource::new(Object::new(Kind::CONFIG_MAP, &key("cm"))), &[])
            .unwrap();
        let sec = graph
            .add_resource(Resource::new(Object::new(Kind::SECRET, &key("sec"))), &[])
            .unwrap();
        let dep = graph
            .add_resource(Resource::new(Object::new(Kind::DEPLOYMENT, &key("dep"))), &[cm, sec])
            .unwrap();

        let report = ApplyReport {
            succeeded: vec![Applied {
                handle: cm,
                kind: Kind::CONFIG_MAP,
                key: key("cm"),
                outcome: Outcome::Unchanged,
            }],
            failed: vec![(
                sec,
                ApplyError {
                    kind: Kind::SECRET,
                    key: key("sec"),
                    source: ApplyFailure::Create(StoreError::Other(anyhow::anyhow!("denied"))),
                },
            )],
            blocked: vec![(
                dep,
                Blocked {
                    kind: Kind::DEPLOYMENT,
                    key: key("dep"),
                    waiting_on: "Secret/ns/sec".into(),
                },
            )],
            execution_times: HashMap::new(),
        };

        assert!(!report.is_success());

        let rendered = report.render_mermaid(&graph);
        assert!(rendered.contains("0[\"ConfigMap/ns/cm\\nUnchanged\"]"));
        assert!(rendered.contains("style 0 fill:#ADD8E6"));
        assert!(rendered.contains("style 1 fill:#FF7F7F"));
        assert!(rendered.contains("style 2 fill:#D3D3D3"));
        assert!(rendered.contains("1 --> 2"));

        let error = report.into_result().unwrap_err();
        assert_eq!(error.failed.len(), 1);
        assert!(error.to_string().contains("blocked by Secret/ns/sec"));
    }
}
