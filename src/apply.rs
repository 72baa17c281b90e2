//! The apply engine.
//!
//! Turns a flat list of desired children into a [`ResourceGraph`] wired with
//! the default ordering of their kinds, then drives the graph against the
//! store. The engine also evaluates the readiness of the same children.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{GraphError, ReadinessError};
use crate::graph::runner::{AbortOnDrop, panic_message};
use crate::graph::{ApplyReport, Handle, ResourceGraph};
use crate::object::{Kind, ObjectKey};
use crate::resource::Resource;
use crate::store::ObjectStore;

/// A reference from one child to another, found by walking its body.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Reference {
    ConfigMap(String),
    Secret(String),
    Service(String),
}

fn name_of(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn collect_references(value: &Value, found: &mut BTreeSet<Reference>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                match key.as_str() {
                    "configMap" | "configMapRef" | "configMapKeyRef" => {
                        if let Some(name) = name_of(value, "name") {
                            found.insert(Reference::ConfigMap(name));
                        }
                    }
                    "secret" => {
                        if let Some(name) = name_of(value, "secretName") {
                            found.insert(Reference::Secret(name));
                        }
                    }
                    "secretRef" | "secretKeyRef" => {
                        if let Some(name) = name_of(value, "name") {
                            found.insert(Reference::Secret(name));
                        }
                    }
                    "service" => {
                        if let Some(name) = name_of(value, "name") {
                            found.insert(Reference::Service(name));
                        }
                    }
                    "serviceName" => {
                        if let Some(name) = value.as_str().filter(|name| !name.is_empty()) {
                            found.insert(Reference::Service(name.to_string()));
                        }
                    }
                    "tls" => {
                        for entry in value.as_array().into_iter().flatten() {
                            if let Some(name) = name_of(entry, "secretName") {
                                found.insert(Reference::Secret(name));
                            }
                        }
                    }
                    _ => {}
                }

                collect_references(value, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

/// Which references a kind waits for.
fn follows(kind: &Kind, reference: &Reference) -> bool {
    match (kind.as_str(), reference) {
        ("Deployment", Reference::ConfigMap(_) | Reference::Secret(_)) => true,
        ("Ingress", Reference::Service(_) | Reference::Secret(_)) => true,
        _ => false,
    }
}

/// Lookup of the children of one pass by what they can be referenced as.
#[derive(Default)]
struct Index {
    by_key: HashMap<(Kind, ObjectKey), Handle>,
    /// Certificates by the namespace and name of the secret they issue.
    certificates: HashMap<ObjectKey, Vec<Handle>>,
}

impl Index {
    fn resolve(&self, namespace: &str, reference: &Reference) -> Vec<Handle> {
        let (kind, name) = match reference {
            Reference::ConfigMap(name) => (Kind::CONFIG_MAP, name),
            Reference::Secret(name) => (Kind::SECRET, name),
            Reference::Service(name) => (Kind::SERVICE, name),
        };
        let key = ObjectKey::new(namespace, name);

        let mut handles: Vec<Handle> = self
            .by_key
            .get(&(kind, key.clone()))
            .copied()
            .into_iter()
            .collect();

        if let Reference::Secret(_) = reference
            && let Some(certificates) = self.certificates.get(&key)
        {
            handles.extend(certificates.iter().copied());
        }

        handles
    }
}

/// Aggregated readiness of a set of children.
#[derive(Debug, Default)]
pub struct Readiness {
    /// Labels of children that are missing or not ready yet, sorted.
    pub pending: Vec<String>,
    /// Children whose readiness could not be evaluated.
    pub errors: Vec<ReadinessError>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.pending.is_empty() && self.errors.is_empty()
    }
}

#[derive(Clone)]
pub struct ApplyEngine {
    store: Arc<dyn ObjectStore>,
    workers: usize,
}

impl ApplyEngine {
    pub fn new(store: Arc<dyn ObjectStore>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Builds the graph for `children`, in order, with the default
    /// dependencies of their kinds:
    ///
    /// * a `Deployment` waits for the `ConfigMap`s and `Secret`s it mounts or
    ///   reads from, and for the `Certificate`s issuing those secrets;
    /// * an `Ingress` waits for the `Service`s it routes to, and for the
    ///   secrets and `Certificate`s backing its TLS entries.
    ///
    /// References to objects outside of `children` are ignored.
    pub fn plan(&self, children: Vec<Resource>) -> Result<ResourceGraph, GraphError> {
        let mut graph = ResourceGraph::new();
        let mut index = Index::default();
        let mut handles = Vec::with_capacity(children.len());

        for resource in children {
            let kind = resource.kind().clone();
            let key = resource.key();

            let secret_name = (kind == Kind::CERTIFICATE)
                .then(|| resource.desired().pointer("/spec/secretName"))
                .flatten()
                .and_then(Value::as_str)
                .map(|name| ObjectKey::new(&key.namespace, name));

            let handle = graph.add_resource(resource, &[])?;

            if let Some(secret) = secret_name {
                index.certificates.entry(secret).or_default().push(handle);
            }
            index.by_key.insert((kind, key), handle);
            handles.push(handle);
        }

        for &handle in &handles {
            let Some(resource) = graph.resource(handle) else {
                continue;
            };

            let kind = resource.kind().clone();
            let namespace = resource.key().namespace;

            let mut references = BTreeSet::new();
            collect_references(&Value::Object(resource.desired().body.clone()), &mut references);

            let mut dependencies = BTreeSet::new();
            for reference in references.iter().filter(|r| follows(&kind, r)) {
                dependencies.extend(index.resolve(&namespace, reference));
            }
            dependencies.remove(&handle);

            for dependency in dependencies {
                graph.add_dependency(handle, dependency)?;
            }
        }

        debug!(nodes = graph.len(), edges = graph.edge_count(), "planned resource graph");
        Ok(graph)
    }

    /// Applies every node of `graph`, at most `workers` at a time.
    pub async fn apply(&self, graph: &ResourceGraph) -> ApplyReport {
        graph.apply(self.store.clone(), self.workers).await
    }

    /// Evaluates the readiness predicate of every child concurrently.
    ///
    /// A predicate that panics is reported as an error of its child, never
    /// as ready.
    pub async fn readiness(&self, children: &[Resource]) -> Readiness {
        let mut checks = JoinSet::new();

        for resource in children {
            let resource = resource.clone();
            let store = self.store.clone();
            checks.spawn(async move {
                let kind = resource.kind().clone();
                let (key, label) = (resource.key(), resource.label());
                let mut task = AbortOnDrop(tokio::spawn(async move {
                    resource.check(store.as_ref()).await
                }));

                let result = match (&mut task.0).await {
                    Ok(result) => result,
                    Err(error) => Err(ReadinessError::Panicked {
                        kind,
                        key,
                        message: panic_message(error)
                            .unwrap_or_else(|| String::from("Task was cancelled")),
                    }),
                };
                (label, result)
            });
        }

        let mut readiness = Readiness::default();

        while let Some(joined) = checks.join_next().await {
            // The outer task only awaits the inner one, which carries any
            // panic of the predicate.
            let Ok((label, result)) = joined else {
                continue;
            };

            match result {
                Ok(true) => {}
                Ok(false) => readiness.pending.push(label),
                Err(error) => readiness.errors.push(error),
            }
        }

        readiness.pending.sort();
        readiness
    }
}
