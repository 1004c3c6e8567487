// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module contains methods that help with graph traversal.

use crate::{Error, TopologyGraph, TopologyNode};

/// Traversal methods.
impl TopologyGraph {
    fn find(
        &self,
        from: &str,
        mut pred: impl FnMut(&TopologyNode) -> bool,
        direction: petgraph::Direction,
    ) -> Result<Option<&TopologyNode>, Error> {
        let mut stack = vec![self.index_of(from)?];

        while let Some(index) = stack.pop() {
            let node = &self.graph[index];
            if pred(node) {
                return Ok(Some(node));
            }

            let neighbors = self.graph.neighbors_directed(index, direction);
            stack.extend(neighbors);
        }

        Ok(None)
    }

    fn find_all(
        &self,
        from: &str,
        mut pred: impl FnMut(&TopologyNode) -> bool,
        direction: petgraph::Direction,
    ) -> Result<Vec<&TopologyNode>, Error> {
        let mut stack = vec![self.index_of(from)?];
        let mut found = vec![];

        while let Some(index) = stack.pop() {
            let node = &self.graph[index];
            if pred(node) {
                found.push(node);
            }

            let neighbors = self.graph.neighbors_directed(index, direction);
            stack.extend(neighbors);
        }

        Ok(found)
    }

    /// Find the node that satisfies the given predicate starting from the given
    /// node and traversing away from the roots.
    pub fn find_successor(
        &self,
        from: &str,
        pred: impl FnMut(&TopologyNode) -> bool,
    ) -> Result<Option<&TopologyNode>, Error> {
        self.find(from, pred, petgraph::Direction::Outgoing)
    }

    /// Find the node that satisfies the given predicate starting from the given
    /// node and traversing towards the root.
    pub fn find_predecessor(
        &self,
        from: &str,
        pred: impl FnMut(&TopologyNode) -> bool,
    ) -> Result<Option<&TopologyNode>, Error> {
        self.find(from, pred, petgraph::Direction::Incoming)
    }

    /// Returns the meters in the sub-tree of the given node, sorted by id.
    ///
    /// For a meter, that is the meter itself.
    pub fn meters_under(&self, node_id: &str) -> Result<Vec<&TopologyNode>, Error> {
        let mut meters = self.find_all(node_id, |n| n.is_meter(), petgraph::Direction::Outgoing)?;
        meters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(meters)
    }

    /// Returns the substation that feeds the given node, if it has one.
    pub fn substation_of(&self, node_id: &str) -> Result<Option<&TopologyNode>, Error> {
        self.find_predecessor(node_id, |n| n.is_substation())
    }
}
