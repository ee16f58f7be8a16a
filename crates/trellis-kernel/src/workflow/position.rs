//! Graph Position
//!
//! Where a workflow instance currently is, how it got there, and when each
//! edge was last traversed. Positions are immutable; every move returns a
//! new position with one more entry in the visit history.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{EdgeId, NodeId};

/// Traversal history and current location of one workflow instance.
///
/// Invariants: the visit list is never empty, its last entry is the current
/// node, and `depth == visited.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PositionRepr", into = "PositionRepr")]
pub struct GraphPosition {
    current: NodeId,
    previous: Option<NodeId>,
    visited: Vec<NodeId>,
    edge_history: HashMap<EdgeId, DateTime<Utc>>,
    depth: usize,
}

impl GraphPosition {
    /// Initial position: depth 0, single visit, no edges.
    pub fn at(node: NodeId) -> Self {
        Self {
            current: node.clone(),
            previous: None,
            visited: vec![node],
            edge_history: HashMap::new(),
            depth: 0,
        }
    }

    /// Move to `node` without recording an edge.
    pub fn move_to(&self, node: NodeId) -> Self {
        let mut visited = self.visited.clone();
        visited.push(node.clone());
        Self {
            previous: Some(self.current.clone()),
            current: node,
            visited,
            edge_history: self.edge_history.clone(),
            depth: self.depth + 1,
        }
    }

    /// Move to `target` through `edge`, refreshing the edge's timestamp.
    pub fn traverse_edge(&self, edge: EdgeId, target: NodeId) -> Self {
        self.traverse_edge_at(edge, target, Utc::now())
    }

    /// Same as [`traverse_edge`](Self::traverse_edge) with an explicit time.
    pub fn traverse_edge_at(&self, edge: EdgeId, target: NodeId, at: DateTime<Utc>) -> Self {
        let mut next = self.move_to(target);
        next.edge_history.insert(edge, at);
        next
    }

    /// Jump back to `node`. This is a move, not a truncation: the target is
    /// appended to the history again.
    pub fn reset_to(&self, node: NodeId) -> Self {
        self.move_to(node)
    }

    pub fn current(&self) -> &NodeId {
        &self.current
    }

    pub fn previous(&self) -> Option<&NodeId> {
        self.previous.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Ordered visit history, repeats included.
    pub fn path(&self) -> &[NodeId] {
        &self.visited
    }

    /// Visit history joined with `" -> "`.
    pub fn path_string(&self) -> String {
        self.visited
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.visited.contains(node)
    }

    /// Number of times `node` appears in the history, initial position included.
    pub fn visit_count(&self, node: &NodeId) -> usize {
        self.visited.iter().filter(|n| *n == node).count()
    }

    /// True iff some node was visited more than once.
    pub fn has_cycle(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.visited.len());
        self.visited.iter().any(|node| !seen.insert(node))
    }

    pub fn has_traversed_edge(&self, edge: &EdgeId) -> bool {
        self.edge_history.contains_key(edge)
    }

    /// When `edge` was last traversed.
    pub fn edge_traversal_time(&self, edge: &EdgeId) -> Option<DateTime<Utc>> {
        self.edge_history.get(edge).copied()
    }

    pub fn edge_history(&self) -> &HashMap<EdgeId, DateTime<Utc>> {
        &self.edge_history
    }
}

/// Wire form; invariants are re-checked on the way in.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRepr {
    current: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<NodeId>,
    visited: Vec<NodeId>,
    #[serde(default)]
    edge_history: HashMap<EdgeId, DateTime<Utc>>,
    depth: usize,
}

impl TryFrom<PositionRepr> for GraphPosition {
    type Error = String;

    fn try_from(repr: PositionRepr) -> Result<Self, Self::Error> {
        let Some(last) = repr.visited.last() else {
            return Err("position visit history must not be empty".to_string());
        };
        if *last != repr.current {
            return Err(format!(
                "position current node '{}' is not the last visited node '{}'",
                repr.current, last
            ));
        }
        if repr.depth + 1 != repr.visited.len() {
            return Err(format!(
                "position depth {} does not match {} visited nodes",
                repr.depth,
                repr.visited.len()
            ));
        }
        Ok(Self {
            current: repr.current,
            previous: repr.previous,
            visited: repr.visited,
            edge_history: repr.edge_history,
            depth: repr.depth,
        })
    }
}

impl From<GraphPosition> for PositionRepr {
    fn from(position: GraphPosition) -> Self {
        Self {
            current: position.current,
            previous: position.previous,
            visited: position.visited,
            edge_history: position.edge_history,
            depth: position.depth,
        }
    }
}
