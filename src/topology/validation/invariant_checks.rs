// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Helper methods for checking invariants of a [`TopologyGraph`][crate::TopologyGraph].

use crate::{Error, TopologyNode};

use super::TopologyGraphValidator;

impl TopologyGraphValidator<'_> {
    /// Checks that the given node is a leaf node.
    pub(super) fn ensure_leaf(&self, node: &TopologyNode) -> Result<(), Error> {
        if let Some(successor) = self.tg.successors(&node.id)?.next() {
            return Err(Error::invalid_graph(format!(
                "{}:{} can't have any successors. Found {}:{}.",
                node.kind, node.id, successor.kind, successor.id
            )));
        }
        Ok(())
    }

    /// Checks that the given node is *not* a leaf node.
    pub(super) fn ensure_not_leaf(&self, node: &TopologyNode) -> Result<(), Error> {
        if self.tg.successors(&node.id)?.next().is_none() {
            return Err(Error::invalid_graph(format!(
                "{}:{} must have at least one successor.",
                node.kind, node.id
            )));
        }
        Ok(())
    }

    /// Checks that the given node is a root node.
    pub(super) fn ensure_root(&self, node: &TopologyNode) -> Result<(), Error> {
        if let Some(predecessor) = self.tg.predecessors(&node.id)?.next() {
            return Err(Error::invalid_graph(format!(
                "{}:{} can't have any predecessors. Found {}:{}.",
                node.kind, node.id, predecessor.kind, predecessor.id
            )));
        }
        Ok(())
    }

    /// Checks that the given node is *not* a root node.
    pub(super) fn ensure_has_parent(&self, node: &TopologyNode) -> Result<(), Error> {
        if self.tg.predecessors(&node.id)?.next().is_none() {
            return Err(Error::invalid_graph(format!(
                "{}:{} must have a predecessor.",
                node.kind, node.id
            )));
        }
        Ok(())
    }

    /// Checks that the given node has at most one predecessor.
    pub(super) fn ensure_single_parent(&self, node: &TopologyNode) -> Result<(), Error> {
        let mut parents: Vec<&str> = self
            .tg
            .predecessors(&node.id)?
            .map(|p| p.id.as_str())
            .collect();
        if parents.len() > 1 {
            parents.sort();
            return Err(Error::invalid_graph(format!(
                "{}:{} has more than one parent: {}.",
                node.kind,
                node.id,
                parents.join(", ")
            )));
        }
        Ok(())
    }
}
