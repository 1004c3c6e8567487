// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Iterators over nodes and lines in a `TopologyGraph`.

use petgraph::graph::DiGraph;

use crate::{Line, TopologyGraph, TopologyNode};

/// An iterator over the nodes in a `TopologyGraph`.
pub struct Nodes<'a> {
    pub(crate) iter: std::slice::Iter<'a, petgraph::graph::Node<TopologyNode>>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a TopologyNode;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|n| &n.weight)
    }
}

/// An iterator over the lines in a `TopologyGraph`.
pub struct Lines<'a> {
    pub(crate) tg: &'a TopologyGraph,
    pub(crate) iter: std::slice::Iter<'a, petgraph::graph::Edge<()>>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a Line;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter
            .next()
            .and_then(|e| self.tg.lines.get(&(e.source(), e.target())))
    }
}

/// An iterator over the neighbors of a node in a `TopologyGraph`.
pub struct Neighbors<'a> {
    pub(crate) graph: &'a DiGraph<TopologyNode, ()>,
    pub(crate) iter: petgraph::graph::Neighbors<'a, ()>,
}

impl<'a> Iterator for Neighbors<'a> {
    type Item = &'a TopologyNode;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|i| &self.graph[i])
    }
}
