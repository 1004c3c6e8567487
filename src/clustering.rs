// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Greedy agglomeration of candidate edges into a radial cluster forest.
//!
//! Candidate edges are merged Kruskal style, highest confidence first, with a
//! union-find over the meters rejecting every merge that would close a loop.
//! Equal-confidence edges merge in ascending `(meter_a, meter_b)` order, so
//! identical inputs always produce identical forests.

use petgraph::unionfind::UnionFind;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::inference::{rank_order, CandidateEdge};
use crate::profile::{self, AlignedProfile, GridSample, Series};
use crate::{Error, TopologyConfig};

/// Identifies a cluster within a [`ClusterForest`].
///
/// Leaf clusters (one per meter) come first, in meter id order, followed by
/// merged clusters in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(usize);

impl ClusterId {
    /// Returns the position of the cluster in creation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster:{}", self.0)
    }
}

/// A node of the cluster forest: either a single meter (a leaf) or a group of
/// child clusters.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    id: ClusterId,
    meter_id: Option<String>,
    children: Vec<ClusterId>,
    parent: Option<ClusterId>,
    confidence: f64,
    head: Option<String>,
    depth: usize,
    aggregate: Series,
}

impl Cluster {
    /// Returns the id of the cluster.
    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Returns the meter of a leaf cluster.
    pub fn meter_id(&self) -> Option<&str> {
        self.meter_id.as_deref()
    }

    /// Returns true if the cluster is a single meter.
    pub fn is_leaf(&self) -> bool {
        self.meter_id.is_some()
    }

    /// Returns the ids of the child clusters, sorted.
    pub fn children(&self) -> &[ClusterId] {
        &self.children
    }

    /// Returns the id of the enclosing cluster, if any.
    pub fn parent(&self) -> Option<ClusterId> {
        self.parent
    }

    /// The confidence of the merge that created the cluster.  1 for leaves.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The member meter that measures the feed of the whole cluster, if one
    /// was identified.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    /// Number of cluster levels below this one.  0 for leaves.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Summed P/Q and mean V of the children.  For leaves, the meter's own
    /// profile.
    pub fn aggregate(&self) -> &[Option<GridSample>] {
        &self.aggregate
    }
}

/// Why the agglomeration stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// All meters ended up in a single tree.
    Converged,
    /// Every candidate edge was considered.
    Exhausted,
    /// The next edge was below the minimum confidence.
    ConfidenceCutoff { confidence: f64 },
    /// Merging the next edge would have exceeded the maximum depth.
    DepthLimit { meter_a: String, meter_b: String },
}

/// The forest of clusters produced by the agglomeration.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterForest {
    clusters: Vec<Option<Cluster>>,
    leaves: BTreeMap<String, ClusterId>,
    roots: Vec<ClusterId>,
    stop_reason: StopReason,
    merges: usize,
    skipped_cycles: usize,
    notes: Vec<String>,
}

/// Cluster retrieval.
impl ClusterForest {
    /// Returns the cluster with the given id, if it still exists.
    pub fn cluster(&self, id: ClusterId) -> Result<&Cluster, Error> {
        self.clusters
            .get(id.0)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| Error::node_not_found(format!("Cluster {id} not found.")))
    }

    /// Returns an iterator over all clusters, in id order.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().flatten()
    }

    /// Returns the leaf cluster of the given meter.
    pub fn leaf(&self, meter_id: &str) -> Result<&Cluster, Error> {
        self.leaves
            .get(meter_id)
            .ok_or_else(|| Error::node_not_found(format!("Meter {meter_id} not found.")))
            .and_then(|&id| self.cluster(id))
    }

    /// Returns the roots of the forest, in id order.
    pub fn roots(&self) -> &[ClusterId] {
        &self.roots
    }

    /// Returns the leaves below the given cluster, in traversal order.
    pub fn leaves_under(&self, id: ClusterId) -> Result<Vec<&Cluster>, Error> {
        let mut stack = vec![id];
        let mut found = vec![];
        while let Some(id) = stack.pop() {
            let cluster = self.cluster(id)?;
            if cluster.is_leaf() {
                found.push(cluster);
            }
            stack.extend(cluster.children.iter().rev());
        }
        Ok(found)
    }

    /// Returns the series a cluster contributes to its parent: the head
    /// meter's measurement when the cluster has one, its aggregate otherwise.
    pub fn effective_profile(&self, id: ClusterId) -> Result<&[Option<GridSample>], Error> {
        let cluster = self.cluster(id)?;
        match &cluster.head {
            Some(head) => Ok(self.leaf(head)?.aggregate()),
            None => Ok(cluster.aggregate()),
        }
    }

    /// Returns why the agglomeration stopped.
    pub fn stop_reason(&self) -> &StopReason {
        &self.stop_reason
    }

    /// Returns the number of merges performed.
    pub fn merges(&self) -> usize {
        self.merges
    }

    /// Returns the number of candidate edges skipped because they would have
    /// closed a loop.
    pub fn skipped_cycles(&self) -> usize {
        self.skipped_cycles
    }

    /// Human readable remarks about the outcome.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// Agglomeration.
impl ClusterForest {
    /// Builds the forest from candidate edges over the meters of `profiles`.
    ///
    /// The candidates are merged in rank order regardless of the order they
    /// are passed in.
    pub fn try_new(
        candidates: &[CandidateEdge],
        profiles: &[AlignedProfile],
        config: &TopologyConfig,
    ) -> Result<Self, Error> {
        let mut forest = Self::with_leaves(profiles);
        let mut components = UnionFind::new(profiles.len());
        let mut live_roots = profiles.len();

        let mut ranked: Vec<&CandidateEdge> = candidates.iter().collect();
        ranked.sort_by(|a, b| rank_order(a, b));

        forest.stop_reason = StopReason::Exhausted;
        for edge in ranked {
            if live_roots <= 1 {
                forest.stop_reason = StopReason::Converged;
                break;
            }
            if edge.confidence < config.min_confidence {
                forest.stop_reason = StopReason::ConfidenceCutoff {
                    confidence: edge.confidence,
                };
                break;
            }

            let (Some(&a), Some(&b)) = (
                forest.leaves.get(&edge.meter_a),
                forest.leaves.get(&edge.meter_b),
            ) else {
                tracing::warn!("Ignoring candidate {} with an unknown meter.", edge);
                continue;
            };
            if components.equiv(a.0, b.0) {
                tracing::trace!("Skipping {}: it would close a loop.", edge);
                forest.skipped_cycles += 1;
                continue;
            }

            if !forest.merge(edge, a, b, config)? {
                forest.stop_reason = StopReason::DepthLimit {
                    meter_a: edge.meter_a.clone(),
                    meter_b: edge.meter_b.clone(),
                };
                break;
            }
            components.union(a.0, b.0);
            live_roots -= 1;
        }
        if live_roots <= 1 && forest.stop_reason == StopReason::Exhausted {
            forest.stop_reason = StopReason::Converged;
        }

        forest.roots = forest
            .clusters()
            .filter(|c| c.parent.is_none())
            .map(|c| c.id)
            .collect();

        if forest.merges == 0 && profiles.len() > 1 {
            forest.notes.push(format!(
                "No candidate edge reached the minimum confidence of {}; every meter is its own cluster.",
                config.min_confidence
            ));
        } else if forest.roots.len() > 1 {
            forest.notes.push(format!(
                "The meters form {} separate trees.",
                forest.roots.len()
            ));
        }

        tracing::debug!(
            "Built {} clusters with {} roots, skipped {} loops, stopped: {:?}.",
            forest.merges,
            forest.roots.len(),
            forest.skipped_cycles,
            forest.stop_reason
        );

        Ok(forest)
    }

    fn with_leaves(profiles: &[AlignedProfile]) -> Self {
        let clusters = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                Some(Cluster {
                    id: ClusterId(idx),
                    meter_id: Some(p.meter_id().to_string()),
                    children: vec![],
                    parent: None,
                    confidence: 1.0,
                    head: None,
                    depth: 0,
                    aggregate: p.samples().to_vec(),
                })
            })
            .collect();
        let leaves = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.meter_id().to_string(), ClusterId(idx)))
            .collect();

        Self {
            clusters,
            leaves,
            roots: vec![],
            stop_reason: StopReason::Exhausted,
            merges: 0,
            skipped_cycles: 0,
            notes: vec![],
        }
    }

    fn root_of(&self, id: ClusterId) -> Result<ClusterId, Error> {
        let mut current = id;
        while let Some(parent) = self.cluster(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    fn cluster_mut(&mut self, id: ClusterId) -> Result<&mut Cluster, Error> {
        self.clusters
            .get_mut(id.0)
            .and_then(|c| c.as_mut())
            .ok_or_else(|| Error::internal(format!("Cluster {id} vanished during merging.")))
    }

    /// Merges the trees of leaves `a` and `b` along `edge`.
    ///
    /// Returns false, without changing anything, if the merge would exceed
    /// the maximum depth.
    fn merge(
        &mut self,
        edge: &CandidateEdge,
        a: ClusterId,
        b: ClusterId,
        config: &TopologyConfig,
    ) -> Result<bool, Error> {
        let confidence = edge.confidence;
        let (x, y) = (self.root_of(a)?, self.root_of(b)?);

        // The upstream meter heads the new cluster if it isn't already part
        // of a larger group it doesn't measure.
        let head = match edge.upstream() {
            Some(upstream) => {
                let side = if Some(upstream) == self.cluster(a)?.meter_id() { x } else { y };
                let root = self.cluster(side)?;
                (root.meter_id() == Some(upstream) || root.head() == Some(upstream))
                    .then(|| upstream.to_string())
            }
            None => None,
        };

        let mut children = vec![];
        let mut absorbed = vec![];
        for root_id in [x, y] {
            let root = self.cluster(root_id)?;
            let absorb = match (&root.meter_id, &root.head) {
                (Some(_), _) => false,
                (None, Some(root_head)) => head.as_ref() == Some(root_head),
                (None, None) => (root.confidence - confidence).abs() <= config.merge_tolerance,
            };
            if absorb {
                children.extend(root.children.iter().copied());
                absorbed.push(root_id);
            } else {
                children.push(root_id);
            }
        }
        children.sort();

        let mut depth = 0;
        for &child in &children {
            depth = depth.max(self.cluster(child)?.depth + 1);
        }
        if depth > config.max_depth {
            tracing::debug!(
                "Not merging {}: depth {} exceeds the limit of {}.",
                edge,
                depth,
                config.max_depth
            );
            return Ok(false);
        }

        let mut parts = vec![];
        for &child in &children {
            let cluster = self.cluster(child)?;
            if head.is_some() && cluster.meter_id() == head.as_deref() {
                continue;
            }
            parts.push(self.effective_profile(child)?);
        }
        let aggregate = profile::aggregate(&parts);

        let id = ClusterId(self.clusters.len());
        for &child in &children {
            self.cluster_mut(child)?.parent = Some(id);
        }
        for root_id in absorbed {
            self.clusters[root_id.0] = None;
        }
        tracing::trace!(
            "Merged {} into {} with {} children at {:.4}.",
            edge,
            id,
            children.len(),
            confidence
        );
        self.clusters.push(Some(Cluster {
            id,
            meter_id: None,
            children,
            parent: None,
            confidence,
            head,
            depth,
            aggregate,
        }));
        self.merges += 1;

        Ok(true)
    }
}
