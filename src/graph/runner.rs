use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use petgraph::graph::NodeIndex;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{Instrument, Level, debug, warn};

use crate::error::{ApplyError, ApplyFailure, Blocked};
use crate::graph::{Applied, ApplyReport, Execution, Handle, ResourceGraph};
use crate::resource::Outcome;
use crate::store::ObjectStore;

/// Aborts the wrapped task when dropped, so that cancelling an apply pass
/// also cancels the store calls it has in flight.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Describes a panicked task; `None` when it was cancelled instead.
pub(crate) fn panic_message(error: JoinError) -> Option<String> {
    if !error.is_panic() {
        return None;
    }

    let panic = error.into_panic();
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    Some(message)
}

type NodeResult = (NodeIndex, Result<Outcome, ApplyError>, Execution);

impl ResourceGraph {
    /// Applies every node of the graph against `store`.
    ///
    /// The traversal works as follows:
    /// 1. Every node's count of unresolved dependencies is computed.
    /// 2. Nodes with no unresolved dependency are queued as eligible.
    /// 3. Up to `workers` eligible nodes are applied concurrently.
    /// 4. When a node succeeds, the dependency counts of its dependents are
    ///    decremented and those reaching zero become eligible.
    /// 5. When a node fails, its dependents are never attempted.
    /// 6. The loop ends when nothing is running and nothing is eligible;
    ///    every node that never ran is reported as blocked.
    ///
    /// Dropping the returned future aborts every in-flight node.
    pub async fn apply(&self, store: Arc<dyn ObjectStore>, workers: usize) -> ApplyReport {
        let workers = workers.max(1);
        let mut report = ApplyReport::default();

        if self.is_empty() {
            return report;
        }

        // Build a map from a dependency to the nodes that depend on it.
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in self.graph.raw_edges() {
            dependents
                .entry(edge.source())
                .or_default()
                .push(edge.target());
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| {
                (
                    i,
                    self.graph
                        .neighbors_directed(i, petgraph::Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let mut eligible: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| dependency_counts[i] == 0)
            .collect();

        let root_span = tracing::span!(Level::INFO, "apply_graph", nodes = self.len());
        let mut running: JoinSet<NodeResult> = JoinSet::new();

        loop {
            while running.len() < workers
                && let Some(index) = eligible.pop_front()
            {
                let resource = self.graph[index].clone();
                let (kind, key) = (resource.kind().clone(), resource.key());
                let store = store.clone();
                let span = tracing::span!(
                    parent: &root_span,
                    Level::INFO,
                    "apply",
                    resource = %resource.label(),
                );

                running.spawn(
                    async move {
                        let start = Instant::now();
                        let mut task = AbortOnDrop(tokio::spawn(
                            async move { resource.apply(store.as_ref()).await }.in_current_span(),
                        ));

                        // A panicking node must not take the whole pass down.
                        let result = match (&mut task.0).await {
                            Ok(result) => result,
                            Err(error) => Err(ApplyError {
                                kind,
                                key,
                                source: panic_message(error)
                                    .map_or(ApplyFailure::Cancelled, ApplyFailure::Panicked),
                            }),
                        };

                        let execution = Execution {
                            start,
                            duration: start.elapsed(),
                        };
                        (index, result, execution)
                    }
                    .instrument(span),
                );
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            // The outer task only awaits the inner one and cannot fail on
            // its own unless the whole set is being torn down.
            let Ok((index, result, execution)) = joined else {
                continue;
            };

            report.execution_times.insert(Handle(index), execution);

            match result {
                Ok(outcome) => {
                    let resource = &self.graph[index];
                    debug!(resource = %resource.label(), ?outcome, "applied");

                    report.succeeded.push(Applied {
                        handle: Handle(index),
                        kind: resource.kind().clone(),
                        key: resource.key(),
                        outcome,
                    });

                    // Unlock dependents
                    if let Some(dependents) = dependents.get(&index) {
                        for dependent in dependents {
                            if let Some(count) = dependency_counts.get_mut(dependent) {
                                *count -= 1;
                                if *count == 0 {
                                    eligible.push_back(*dependent);
                                }
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, "cannot apply resource");
                    report.failed.push((Handle(index), error));
                }
            }
        }

        let settled: HashSet<NodeIndex> = report
            .succeeded
            .iter()
            .map(|applied| applied.handle.0)
            .chain(report.failed.iter().map(|(handle, _)| handle.0))
            .collect();

        for index in self.graph.node_indices() {
            if settled.contains(&index) {
                continue;
            }

            let resource = &self.graph[index];
            let waiting_on = self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter(|dependency| {
                    !report
                        .succeeded
                        .iter()
                        .any(|applied| applied.handle.0 == *dependency)
                })
                .map(|dependency| self.graph[dependency].label())
                .min()
                .unwrap_or_default();

            report.blocked.push((
                Handle(index),
                Blocked {
                    kind: resource.kind().clone(),
                    key: resource.key(),
                    waiting_on,
                },
            ));
        }

        report.blocked.sort_by_key(|(handle, _)| *handle);
        report
    }
}
