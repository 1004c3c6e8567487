// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Methods for retrieving nodes and lines from a [`TopologyGraph`].

use petgraph::graph::NodeIndex;

use crate::iterators::{Lines, Neighbors, Nodes};
use crate::{Error, Line, TopologyGraph, TopologyNode};

/// `TopologyNode` and `Line` retrieval.
impl TopologyGraph {
    pub(crate) fn index_of(&self, node_id: &str) -> Result<NodeIndex, Error> {
        self.node_indices
            .get(node_id)
            .copied()
            .ok_or_else(|| Error::node_not_found(format!("Node with id {} not found.", node_id)))
    }

    /// Returns the node with the given `node_id`, if it exists.
    pub fn node(&self, node_id: &str) -> Result<&TopologyNode, Error> {
        self.index_of(node_id).map(|i| &self.graph[i])
    }

    /// Returns an iterator over the nodes in the graph.
    pub fn nodes(&self) -> Nodes {
        Nodes {
            iter: self.graph.raw_nodes().iter(),
        }
    }

    /// Returns an iterator over the lines in the graph.
    pub fn lines(&self) -> Lines {
        Lines {
            tg: self,
            iter: self.graph.raw_edges().iter(),
        }
    }

    /// Returns the line from `parent` to `child`.
    ///
    /// Returns an error if either node doesn't exist, or they aren't
    /// connected.
    pub fn line(&self, parent: &str, child: &str) -> Result<&Line, Error> {
        let key = (self.index_of(parent)?, self.index_of(child)?);
        self.lines.get(&key).ok_or_else(|| {
            Error::node_not_found(format!("No line from {} to {}.", parent, child))
        })
    }

    /// Returns the ids of the roots of the graph, sorted.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Returns an iterator over the *predecessors* of the node with the given
    /// `node_id`.  In a valid graph there is at most one.
    ///
    /// Returns an error if the given `node_id` does not exist.
    pub fn predecessors(&self, node_id: &str) -> Result<Neighbors, Error> {
        self.index_of(node_id).map(|index| Neighbors {
            graph: &self.graph,
            iter: self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming),
        })
    }

    /// Returns an iterator over the *successors* of the node with the given
    /// `node_id`.
    ///
    /// Returns an error if the given `node_id` does not exist.
    pub fn successors(&self, node_id: &str) -> Result<Neighbors, Error> {
        self.index_of(node_id).map(|index| Neighbors {
            graph: &self.graph,
            iter: self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing),
        })
    }
}
