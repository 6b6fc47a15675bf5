//! Dependency graph validation using petgraph.
//!
//! Builds a directed graph from step-declared dependency lists,
//! rejecting undeclared references and cycles before anything runs.
//! The scheduler consumes the graph as in-degree counts plus a
//! dependent adjacency.

use crate::workflow::step::Step;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced before any step executes.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// Cycle detected in the dependency graph
    #[error("Circular dependency involving steps: {0:?}")]
    CircularDependency(Vec<String>),

    /// Step depends on a name that was never declared
    #[error("Step '{step}' depends on undeclared step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    /// Required input was not supplied and has no default
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Two steps share a name
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// The designated return step was never declared
    #[error("Return step not declared: {0}")]
    UnknownReturnStep(String),

    /// Workflow has no steps
    #[error("Workflow cannot be empty")]
    EmptyWorkflow,
}

/// Validated partial order over a workflow's steps.
///
/// Edges run from a prerequisite to each of its dependents. Built once
/// per workflow; validation happens here, so no step runs on an
/// invalid graph.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Builds and validates the graph from a step set.
    ///
    /// # Errors
    ///
    /// - `ConstructionError::MissingDependency` - a step references an
    ///   undeclared name
    /// - `ConstructionError::CircularDependency` - the graph has a
    ///   cycle, named in the error
    pub(crate) fn build(steps: &[Step]) -> Result<Self, ConstructionError> {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for step in steps {
            let idx = graph.add_node(step.name.clone());
            node_map.insert(step.name.clone(), idx);
        }

        for step in steps {
            let to = node_map[&step.name];
            for dep in &step.dependencies {
                if dep == &step.name {
                    return Err(ConstructionError::CircularDependency(vec![step
                        .name
                        .clone()]));
                }
                let from = *node_map.get(dep).ok_or_else(|| {
                    ConstructionError::MissingDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.add_edge(from, to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ConstructionError::CircularDependency(Self::cycle_names(
                &graph,
            )));
        }

        Ok(Self { graph, node_map })
    }

    /// Names the nodes involved in cycles, for error reporting.
    fn cycle_names(graph: &DiGraph<String, ()>) -> Vec<String> {
        petgraph::algo::tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flat_map(|scc| scc.into_iter().map(|idx| graph[idx].clone()))
            .collect()
    }

    /// Returns each step's unresolved-dependency count.
    pub(crate) fn in_degrees(&self) -> HashMap<String, usize> {
        self.node_map
            .iter()
            .map(|(name, &idx)| {
                let degree = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (name.clone(), degree)
            })
            .collect()
    }

    /// Returns the steps that directly depend on the given step.
    pub(crate) fn dependents(&self, name: &str) -> Vec<String> {
        match self.node_map.get(name) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|dep_idx| self.graph[dep_idx].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the number of steps in the graph.
    pub(crate) fn step_count(&self) -> usize {
        self.graph.node_count()
    }
}
