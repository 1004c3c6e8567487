// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Methods for creating [`TopologyGraph`] instances from a cluster forest.

use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet};

use crate::{ClusterForest, ClusterId, Error, NodeKind};

use super::{Line, LineMap, NodeIndexMap, TopologyGraph, TopologyNode};

/// Assigns a node id to every cluster of the forest.
///
/// Meters keep their own ids.  Other clusters are named after their
/// [`ClusterId`], with a numeric suffix if a meter already has that name.
fn node_ids(forest: &ClusterForest) -> BTreeMap<ClusterId, String> {
    let mut taken: BTreeSet<String> = forest
        .clusters()
        .filter_map(|c| c.meter_id().map(str::to_string))
        .collect();

    let mut ids = BTreeMap::new();
    for cluster in forest.clusters() {
        let id = match cluster.meter_id() {
            Some(meter_id) => meter_id.to_string(),
            None => {
                let base = cluster.id().to_string();
                let mut id = base.clone();
                let mut suffix = 1;
                while taken.contains(&id) {
                    id = format!("{base}.{suffix}");
                    suffix += 1;
                }
                taken.insert(id.clone());
                id
            }
        };
        ids.insert(cluster.id(), id);
    }
    ids
}

/// `TopologyGraph` instantiation.
impl TopologyGraph {
    /// Creates a new [`TopologyGraph`] from the given cluster forest.
    ///
    /// Meters keep their ids, other clusters are named `cluster:<n>`.
    /// Returns an error if the forest doesn't describe a radial network.
    pub fn try_from_forest(forest: &ClusterForest) -> Result<Self, Error> {
        let ids = node_ids(forest);
        let id_of = |cluster: ClusterId| {
            ids.get(&cluster)
                .cloned()
                .ok_or_else(|| Error::node_not_found(format!("Cluster {cluster} not found.")))
        };

        let mut nodes = vec![];
        let mut lines = vec![];
        for cluster in forest.clusters() {
            nodes.push(TopologyNode {
                id: id_of(cluster.id())?,
                kind: if cluster.is_leaf() {
                    NodeKind::Meter
                } else if cluster.parent().is_none() {
                    NodeKind::Substation
                } else {
                    NodeKind::Feeder
                },
                confidence: cluster.confidence(),
                head: cluster.head().map(str::to_string),
            });
            for &child in cluster.children() {
                lines.push((id_of(cluster.id())?, id_of(child)?, cluster.confidence()));
            }
        }

        Self::try_new(nodes, lines)
    }

    /// Creates a new [`TopologyGraph`] from nodes and `(parent, child,
    /// confidence)` lines.
    pub(crate) fn try_new(
        nodes: impl IntoIterator<Item = TopologyNode>,
        lines: impl IntoIterator<Item = (String, String, f64)>,
    ) -> Result<Self, Error> {
        let (graph, node_indices) = Self::create_graph(nodes)?;

        let mut tg = Self {
            graph,
            node_indices,
            roots: vec![],
            lines: LineMap::new(),
        };
        tg.add_lines(lines)?;
        tg.roots = tg.find_roots()?;

        super::validation::validate(&tg)?;

        tracing::debug!(
            "Created a topology graph with {} nodes, {} lines and {} roots.",
            tg.graph.node_count(),
            tg.lines.len(),
            tg.roots.len()
        );

        Ok(tg)
    }

    fn create_graph(
        nodes: impl IntoIterator<Item = TopologyNode>,
    ) -> Result<(DiGraph<TopologyNode, ()>, NodeIndexMap), Error> {
        let mut graph = DiGraph::new();
        let mut indices = NodeIndexMap::new();

        for node in nodes {
            if indices.contains_key(&node.id) {
                return Err(Error::invalid_graph(format!(
                    "Duplicate node id found: {}",
                    node.id
                )));
            }
            let id = node.id.clone();
            let idx = graph.add_node(node);
            indices.insert(id, idx);
        }

        Ok((graph, indices))
    }

    fn add_lines(&mut self, lines: impl IntoIterator<Item = (String, String, f64)>) -> Result<(), Error> {
        let mut lines: Vec<(String, String, f64)> = lines.into_iter().collect();
        lines.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.0.cmp(&b.0))
                .then_with(|| a.1.cmp(&b.1))
        });

        for (rank, (parent, child, confidence)) in lines.into_iter().enumerate() {
            if parent == child {
                return Err(Error::invalid_graph(format!(
                    "Line:({parent}, {child}) Can't connect a node to itself."
                )));
            }
            let index_of = |id: &String| {
                self.node_indices.get(id).copied().ok_or_else(|| {
                    Error::invalid_graph(format!(
                        "Line:({parent}, {child}) Can't find a node with id {id}"
                    ))
                })
            };
            let parent_idx = index_of(&parent)?;
            let child_idx = index_of(&child)?;

            self.graph.update_edge(parent_idx, child_idx, ());
            self.lines.insert(
                (parent_idx, child_idx),
                Line {
                    parent,
                    child,
                    confidence,
                    impedance_rank: rank + 1,
                },
            );
        }

        Ok(())
    }

    fn find_roots(&self) -> Result<Vec<String>, Error> {
        let mut roots: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].id.clone())
            .collect();

        if roots.is_empty() && self.graph.node_count() > 0 {
            return Err(Error::invalid_graph("No root node found."));
        }
        roots.sort();

        Ok(roots)
    }
}
