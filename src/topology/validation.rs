// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Methods for validating a [`TopologyGraph`].

mod invariant_checks;
mod validate_graph;

use crate::{Error, NodeKind, TopologyGraph, TopologyNode};

pub(crate) struct TopologyGraphValidator<'a> {
    tg: &'a TopologyGraph,
}

pub(crate) fn validate(tg: &TopologyGraph) -> Result<(), Error> {
    let validator = TopologyGraphValidator { tg };

    for root in tg.roots() {
        validator.validate_acyclicity(tg.node(root)?, vec![])?;
    }
    validator.validate_connected_graph()?;

    for node in tg.nodes() {
        validator.validate_node(node)?;
    }

    Ok(())
}

impl TopologyGraphValidator<'_> {
    /// Validates the position of a node in the graph, based on its kind.
    fn validate_node(&self, node: &TopologyNode) -> Result<(), Error> {
        self.ensure_single_parent(node)?;
        match node.kind {
            NodeKind::Substation => {
                self.ensure_root(node)?;
                self.ensure_not_leaf(node)?;
            }
            NodeKind::Feeder => {
                self.ensure_has_parent(node)?;
                self.ensure_not_leaf(node)?;
            }
            NodeKind::Meter => self.ensure_leaf(node)?,
        }
        Ok(())
    }
}
