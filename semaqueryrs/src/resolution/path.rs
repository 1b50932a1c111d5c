use std::fmt;

use serde::Serialize;

use crate::resolution::dag::{ResolutionDag, ResolutionNodeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PathNode {
    pub id: ResolutionNodeId,
    pub description: String,
}

/// Route through the resolution DAG, outermost node first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ResolutionPath {
    nodes: Vec<PathNode>,
}

impl ResolutionPath {
    pub fn from_nodes(dag: &ResolutionDag, ids: impl IntoIterator<Item = ResolutionNodeId>) -> Self {
        Self {
            nodes: ids
                .into_iter()
                .map(|id| PathNode {
                    id,
                    description: dag.node(id).ui_description(),
                })
                .collect(),
        }
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, dag: &ResolutionDag, id: ResolutionNodeId) {
        self.nodes.push(PathNode {
            id,
            description: dag.node(id).ui_description(),
        });
    }

    pub fn pop(&mut self) {
        self.nodes.pop();
    }

    /// The path without its last node.
    pub fn parent_path(&self) -> ResolutionPath {
        let mut nodes = self.nodes.clone();
        nodes.pop();
        Self { nodes }
    }

    /// `prefix` followed by this path.
    pub fn with_prefix(&self, prefix: &ResolutionPath) -> ResolutionPath {
        let mut nodes = prefix.nodes.clone();
        nodes.extend(self.nodes.iter().cloned());
        Self { nodes }
    }

    /// e.g. `[Resolve Query(['bookings'])] -> [Resolve Metric('bookings')]`.
    pub fn ui_description(&self) -> String {
        self.nodes
            .iter()
            .map(|n| format!("[Resolve {}]", n.description))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ui_description())
    }
}
