// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! A graph representation of the inferred network: substations, feeders and
//! meters, and the lines between them.

mod creation;
mod retrieval;
mod validation;

pub mod iterators;
mod traversal;

#[cfg(test)]
mod test_utils;

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt::Display;

use crate::NodeKind;

/// `TopologyNode`s stored in a `DiGraph` instance can be addressed with
/// `NodeIndex`es.
///
/// `NodeIndexMap` stores the corresponding `NodeIndex` for any node id, so
/// that nodes in the `DiGraph` can be retrieved from their ids.
pub(crate) type NodeIndexMap = HashMap<String, NodeIndex>;

/// `Line`s are not stored in the `DiGraph` instance, so we need to store them
/// separately.
///
/// `LineMap` can be used to lookup the `Line` for any pair of parent and child
/// `NodeIndex` values.
pub(crate) type LineMap = HashMap<(NodeIndex, NodeIndex), Line>;

/// A node of the inferred topology.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyNode {
    /// The meter id for meters, `cluster:<n>` for everything else.
    pub id: String,
    pub kind: NodeKind,
    /// The merge confidence of the cluster.  1 for meters.
    pub confidence: f64,
    /// The meter that measures the feed of a cluster, if one was identified.
    pub head: Option<String>,
}

impl TopologyNode {
    pub fn is_substation(&self) -> bool {
        self.kind == NodeKind::Substation
    }

    pub fn is_feeder(&self) -> bool {
        self.kind == NodeKind::Feeder
    }

    pub fn is_meter(&self) -> bool {
        self.kind == NodeKind::Meter
    }
}

/// An inferred line from a parent node to a child node.
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    pub parent: String,
    pub child: String,
    /// The confidence of the merge that attached the child.
    pub confidence: f64,
    /// The position of the line when all lines are sorted by confidence,
    /// highest first.  A low rank suggests a low impedance path.
    pub impedance_rank: usize,
}

/// A radial graph of the inferred network.
///
/// Lines point away from the substations.  Every node has at most one parent,
/// and every node can be reached from one of the roots.
#[derive(Clone, Debug)]
pub struct TopologyGraph {
    graph: DiGraph<TopologyNode, ()>,
    node_indices: NodeIndexMap,
    roots: Vec<String>,
    lines: LineMap,
}

impl Display for TopologyGraph {
    /// Renders the forest as an indented tree, children sorted by id.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stack: Vec<(usize, &TopologyNode)> = self
            .roots
            .iter()
            .rev()
            .filter_map(|id| self.node_indices.get(id))
            .map(|&idx| (0, &self.graph[idx]))
            .collect();

        while let Some((level, node)) = stack.pop() {
            write!(f, "{:indent$}{} {}", "", node.kind, node.id, indent = level * 2)?;
            if !node.is_meter() {
                write!(f, " (confidence {:.3})", node.confidence)?;
            }
            if let Some(head) = &node.head {
                write!(f, " headed by {head}")?;
            }
            writeln!(f)?;

            let Some(&idx) = self.node_indices.get(&node.id) else {
                continue;
            };
            let mut children: Vec<&TopologyNode> = self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .map(|i| &self.graph[i])
                .collect();
            children.sort_by(|a, b| b.id.cmp(&a.id));
            stack.extend(children.into_iter().map(|c| (level + 1, c)));
        }
        Ok(())
    }
}
