// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module defines the `NodeKind` enum, which represents the role of a
//! node in the inferred topology.

use std::fmt::Display;

/// The role of a node in a [`TopologyGraph`][crate::TopologyGraph].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    /// The root of a tree with at least one child.
    Substation,
    /// A group of meters (or of other feeders) below a substation.
    Feeder,
    /// A metering point.
    Meter,
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Substation => write!(f, "Substation"),
            NodeKind::Feeder => write!(f, "Feeder"),
            NodeKind::Meter => write!(f, "Meter"),
        }
    }
}
