//! The resource graph.
//!
//! Every child resource of an owner is a node in a Directed Acyclic Graph.
//! Edges point from a dependency to its dependent, so a node is eligible to
//! run once all of its incoming edges come from nodes that have succeeded.
//!
//! ## Core abstractions
//!
//! * [`Handle`]: A lightweight, copyable token naming one node. Handles are
//!   returned by [`ResourceGraph::add_resource`] and used to wire later nodes.
//! * [`ApplyReport`]: What happened to every node during one apply pass.
//!
//! The graph is built fresh for every reconciliation and dropped once the
//! apply pass returns.

mod report;
pub(crate) mod runner;

use std::fmt::Write;

use petgraph::Graph;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::NodeIndex;

pub use crate::graph::report::{ApplyReport, Applied, Execution};

use crate::error::GraphError;
use crate::resource::Resource;

/// A reference to a node of a [`ResourceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NodeIndex);

impl Handle {
    /// Position of the node in insertion order.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

#[derive(Debug, Default)]
pub struct ResourceGraph {
    pub(crate) graph: Graph<Resource, ()>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn validate(&self, handle: Handle) -> Result<(), GraphError> {
        match self.graph.node_weight(handle.0) {
            Some(_) => Ok(()),
            None => Err(GraphError::UnknownHandle(handle.index())),
        }
    }

    /// Adds a resource which will only be applied after every resource in
    /// `dependencies` has been applied successfully.
    ///
    /// Fails without touching the graph if a dependency is unknown.
    pub fn add_resource(
        &mut self,
        resource: Resource,
        dependencies: &[Handle],
    ) -> Result<Handle, GraphError> {
        for &dependency in dependencies {
            self.validate(dependency)?;
        }

        let index = self.graph.add_node(resource);

        for dependency in dependencies {
            self.graph.update_edge(dependency.0, index, ());
        }

        Ok(Handle(index))
    }

    /// Declares that `dependent` must wait for `dependency`.
    ///
    /// Fails without touching the graph if the edge would close a cycle.
    pub fn add_dependency(
        &mut self,
        dependent: Handle,
        dependency: Handle,
    ) -> Result<(), GraphError> {
        self.validate(dependent)?;
        self.validate(dependency)?;

        let closes_cycle = dependent == dependency
            || has_path_connecting(&self.graph, dependent.0, dependency.0, None);

        if closes_cycle {
            return Err(GraphError::Cycle {
                dependent: self.graph[dependent.0].label(),
                dependency: self.graph[dependency.0].label(),
            });
        }

        self.graph.update_edge(dependency.0, dependent.0, ());
        Ok(())
    }

    pub fn resource(&self, handle: Handle) -> Option<&Resource> {
        self.graph.node_weight(handle.0)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.graph.node_indices().map(Handle)
    }

    /// Direct dependencies of `handle`.
    pub fn dependencies(&self, handle: Handle) -> Vec<Handle> {
        let mut dependencies: Vec<_> = self
            .graph
            .neighbors_directed(handle.0, petgraph::Direction::Incoming)
            .map(Handle)
            .collect();
        dependencies.sort();
        dependencies
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// One order in which every node comes after all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<Handle>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(Handle).collect())
            .map_err(|cycle| {
                let label = self.graph[cycle.node_id()].label();
                GraphError::Cycle {
                    dependent: label.clone(),
                    dependency: label,
                }
            })
    }

    /// Renders the graph as a Mermaid diagram.
    pub fn render_mermaid(&self) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        for index in self.graph.node_indices() {
            let name = self.graph[index].label().replace('"', "\\\"");
            let _ = writeln!(f, "    {}[\"{}\"]", index.index(), name);
        }

        for edge in self.graph.raw_edges() {
            let _ = writeln!(f, "    {} --> {}", edge.source().index(), edge.target().index());
        }

        f
    }
}
