// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Methods for validating the acyclicity and connectedness of a
//! [`TopologyGraph`][crate::TopologyGraph].

use std::collections::BTreeSet;

use crate::{Error, TopologyNode};

use super::TopologyGraphValidator;

impl TopologyGraphValidator<'_> {
    /// Validates that every node belongs to the tree of one of the roots.
    ///
    /// It does so by ensuring that all the nodes are reachable by traversing
    /// the graph from the roots.
    pub(super) fn validate_connected_graph(&self) -> Result<(), Error> {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: Vec<&str> = self.tg.roots().iter().map(|r| r.as_str()).collect();
        visited.extend(queue.iter().copied());
        while let Some(node_id) = queue.pop() {
            for successor in self.tg.successors(node_id)? {
                if visited.insert(&successor.id) {
                    queue.push(&successor.id);
                }
            }
        }

        let unvisited = self
            .tg
            .nodes()
            .map(|n| n.id.as_str())
            .filter(|id| !visited.contains(id))
            .collect::<Vec<_>>();

        if !unvisited.is_empty() {
            return Err(Error::invalid_graph(format!(
                "Nodes {} are not connected to a root.",
                unvisited.join(", ")
            )));
        }

        Ok(())
    }

    /// Validates that there are no cycles in the graph.
    ///
    /// If a cycle is detected, an error is returned, that lists the nodes in
    /// the cycle.
    pub(super) fn validate_acyclicity(
        &self,
        node: &TopologyNode,
        mut predecessors: Vec<String>,
    ) -> Result<(), Error> {
        predecessors.push(node.id.clone());
        for successor in self.tg.successors(&node.id)? {
            if let Some(first_occurrence) = predecessors.iter().position(|id| *id == successor.id)
            {
                return Err(Error::invalid_graph(format!(
                    "Cycle detected: {} -> {}",
                    predecessors[first_occurrence..].join(" -> "),
                    successor.id
                )));
            }
            self.validate_acyclicity(successor, predecessors.clone())?;
        }
        Ok(())
    }
}
