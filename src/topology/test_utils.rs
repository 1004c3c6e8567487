// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module is only compiled when running unit tests and contains the
//! `TopologyBuilder`, which can declaratively build topology graphs for the
//! tests of the `topology` module, without going through an inference run.

use crate::{Error, NodeKind, TopologyGraph, TopologyNode};

/// Represents a node added to the `TopologyBuilder`.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub(super) struct NodeHandle(usize);

/// A builder for creating topology graphs easily, for use in tests.
pub(super) struct TopologyBuilder {
    nodes: Vec<TopologyNode>,
    lines: Vec<(String, String, f64)>,
    next_cluster: usize,
}

impl TopologyBuilder {
    /// Creates a new `TopologyBuilder`.
    pub(super) fn new() -> Self {
        TopologyBuilder {
            nodes: Vec::new(),
            lines: Vec::new(),
            next_cluster: 0,
        }
    }

    /// Adds a node to the graph and returns its handle.
    pub(super) fn add_node(&mut self, id: &str, kind: NodeKind, confidence: f64) -> NodeHandle {
        self.nodes.push(TopologyNode {
            id: id.to_string(),
            kind,
            confidence,
            head: None,
        });
        NodeHandle(self.nodes.len() - 1)
    }

    fn add_cluster(&mut self, kind: NodeKind, confidence: f64) -> NodeHandle {
        let id = format!("cluster:{}", self.next_cluster);
        self.next_cluster += 1;
        self.add_node(&id, kind, confidence)
    }

    /// Adds a substation to the graph and returns its handle.
    pub(super) fn substation(&mut self, confidence: f64) -> NodeHandle {
        self.add_cluster(NodeKind::Substation, confidence)
    }

    /// Adds a feeder to the graph and returns its handle.
    pub(super) fn feeder(&mut self, confidence: f64) -> NodeHandle {
        self.add_cluster(NodeKind::Feeder, confidence)
    }

    /// Adds a meter to the graph and returns its handle.
    pub(super) fn meter(&mut self, id: &str) -> NodeHandle {
        self.add_node(id, NodeKind::Meter, 1.0)
    }

    /// Connects two nodes with a line carrying the parent's confidence.
    pub(super) fn connect(&mut self, parent: NodeHandle, child: NodeHandle) -> &mut Self {
        let parent = &self.nodes[parent.0];
        self.lines.push((
            parent.id.clone(),
            self.nodes[child.0].id.clone(),
            parent.confidence,
        ));
        self
    }

    /// Connects two nodes by id, whether they exist or not.
    pub(super) fn connect_ids(&mut self, parent: &str, child: &str) -> &mut Self {
        self.lines.push((parent.to_string(), child.to_string(), 1.0));
        self
    }

    /// Builds and returns the topology graph from the nodes and lines added
    /// to the builder.
    pub(super) fn build(&self) -> Result<TopologyGraph, Error> {
        TopologyGraph::try_new(self.nodes.clone(), self.lines.clone())
    }
}
