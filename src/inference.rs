// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Derivation of ranked candidate edges from a similarity matrix.

use petgraph::unionfind::UnionFind;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::config::CandidateStrategy;
use crate::profile::{self, AlignedProfile, Channel, GridSample};
use crate::{SimilarityMatrix, TopologyConfig};

/// Fraction of shared slots in which one meter's power must be at least the
/// other's for it to be considered upstream.
const DOMINANCE_RATIO: f64 = 0.95;

/// The hypothesized relation between the two meters of a candidate edge.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeRole {
    /// Both meters hang off a common upstream point.
    Sibling,
    /// The `upstream` meter measures the feed of the other meter.  Only
    /// assigned when the upstream meter balances against every candidate
    /// neighbor it dominates.
    Feeds { upstream: String },
}

/// The outcome of the power-balance test of a candidate edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BalanceCheck {
    Passed { residual: f64 },
    Failed { residual: f64 },
    /// There was no upstream measurement to test against.
    NotApplicable,
}

impl BalanceCheck {
    fn from_residual(residual: Option<f64>, tolerance: f64) -> Self {
        match residual {
            Some(residual) if residual <= tolerance => BalanceCheck::Passed { residual },
            Some(residual) => BalanceCheck::Failed { residual },
            None => BalanceCheck::NotApplicable,
        }
    }

    /// Returns true if the test was run and failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, BalanceCheck::Failed { .. })
    }
}

/// A hypothesized direct connection between two meters.
///
/// `meter_a` is always lexicographically smaller than `meter_b`.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateEdge {
    pub meter_a: String,
    pub meter_b: String,
    /// The similarity score of the two meters.
    pub similarity: f64,
    /// The similarity, down-weighted if the power-balance test failed.
    pub confidence: f64,
    pub role: EdgeRole,
    pub balance: BalanceCheck,
}

impl CandidateEdge {
    /// Returns the upstream meter, if the edge has a direction.
    pub fn upstream(&self) -> Option<&str> {
        match &self.role {
            EdgeRole::Sibling => None,
            EdgeRole::Feeds { upstream } => Some(upstream),
        }
    }
}

impl Display for CandidateEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.role {
            EdgeRole::Feeds { upstream } if *upstream == self.meter_b => {
                write!(f, "{} <- {}", self.meter_a, self.meter_b)?
            }
            EdgeRole::Feeds { .. } => write!(f, "{} -> {}", self.meter_a, self.meter_b)?,
            EdgeRole::Sibling => write!(f, "{} -- {}", self.meter_a, self.meter_b)?,
        }
        write!(f, " ({:.4})", self.confidence)
    }
}

/// Orders candidates by descending confidence, then by ascending meter ids.
pub(crate) fn rank_order(a: &CandidateEdge, b: &CandidateEdge) -> std::cmp::Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.meter_a.cmp(&b.meter_a))
        .then_with(|| a.meter_b.cmp(&b.meter_b))
}

/// Returns the ranked candidate edges.
///
/// `profiles` must be in the row order of `matrix`.  `anchors` are upstream
/// aggregate measurements used to test sibling edges.
///
/// A meter that draws more power than its candidate neighbors is only taken
/// to feed them if its measurement matches their sum.  Otherwise it is
/// treated as a sibling with a larger load.
pub fn rank_candidates(
    matrix: &SimilarityMatrix,
    profiles: &[AlignedProfile],
    anchors: &[AlignedProfile],
    config: &TopologyConfig,
) -> Vec<CandidateEdge> {
    debug_assert!(profiles
        .iter()
        .map(|p| p.meter_id())
        .eq(matrix.meter_ids().iter().map(|id| id.as_str())));

    let pairs = candidate_pairs(matrix, config.candidate_strategy);
    let tolerance = config.power_balance_tolerance;

    let role_of = |&(i, j): &(usize, usize)| {
        let (a, b) = (&profiles[i], &profiles[j]);
        if feeds(a.samples(), b.samples(), tolerance) {
            Some(i)
        } else if feeds(b.samples(), a.samples(), tolerance) {
            Some(j)
        } else {
            None
        }
    };
    #[cfg(feature = "parallel")]
    let dominant: Vec<Option<usize>> = pairs.par_iter().map(role_of).collect();
    #[cfg(not(feature = "parallel"))]
    let dominant: Vec<Option<usize>> = pairs.iter().map(role_of).collect();

    // The implied downstream cut of every dominant meter.
    let mut fed: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&(i, j), upstream) in pairs.iter().zip(&dominant) {
        match upstream {
            Some(u) if *u == i => fed.entry(i).or_default().push(j),
            Some(_) => fed.entry(j).or_default().push(i),
            None => {}
        }
    }
    let cut_residuals: BTreeMap<usize, Option<f64>> = fed
        .iter()
        .map(|(&u, cut)| {
            let downstream: Vec<&[Option<GridSample>]> =
                cut.iter().map(|&c| profiles[c].samples()).collect();
            (u, profile::balance_residual(profiles[u].samples(), &downstream))
        })
        .collect();

    // A dominant meter that doesn't balance against its cut is just a larger
    // sibling.
    let balances = |u: usize| {
        cut_residuals
            .get(&u)
            .copied()
            .flatten()
            .is_some_and(|residual| residual <= tolerance)
    };
    let upstreams: Vec<Option<usize>> = dominant
        .iter()
        .map(|&upstream| upstream.filter(|&u| balances(u)))
        .collect();

    let test = |(&(i, j), upstream): (&(usize, usize), &Option<usize>)| {
        let (a, b) = (&profiles[i], &profiles[j]);
        let similarity = matrix.score(i, j).unwrap_or(0.0);

        let (role, residual) = match *upstream {
            Some(u) => (
                EdgeRole::Feeds {
                    upstream: profiles[u].meter_id().to_string(),
                },
                cut_residuals.get(&u).copied().flatten(),
            ),
            None => (EdgeRole::Sibling, sibling_residual(a, b, anchors)),
        };
        let balance = BalanceCheck::from_residual(residual, tolerance);
        let confidence = if balance.is_failed() {
            similarity * config.balance_penalty
        } else {
            similarity
        };

        CandidateEdge {
            meter_a: a.meter_id().to_string(),
            meter_b: b.meter_id().to_string(),
            similarity,
            confidence,
            role,
            balance,
        }
    };
    #[cfg(feature = "parallel")]
    let mut candidates: Vec<CandidateEdge> = pairs.par_iter().zip(&upstreams).map(test).collect();
    #[cfg(not(feature = "parallel"))]
    let mut candidates: Vec<CandidateEdge> = pairs.iter().zip(&upstreams).map(test).collect();

    candidates.sort_by(rank_order);

    tracing::debug!(
        "Ranked {} candidate edges, {} directed, {} demoted to siblings, {} failed their \
         power-balance test.",
        candidates.len(),
        upstreams.iter().filter(|u| u.is_some()).count(),
        dominant.iter().zip(&upstreams).filter(|(d, u)| d.is_some() && u.is_none()).count(),
        candidates.iter().filter(|c| c.balance.is_failed()).count()
    );

    candidates
}

/// Returns the `(i, j)` row pairs, with `i < j`, that become candidate edges.
fn candidate_pairs(matrix: &SimilarityMatrix, strategy: CandidateStrategy) -> Vec<(usize, usize)> {
    let n = matrix.len();
    let mut scored: Vec<(usize, usize, f64)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .filter(|&(i, j)| matrix.is_defined(i, j))
        .filter_map(|(i, j)| Some((i, j, matrix.score(i, j)?)))
        .filter(|&(_, _, score)| score > 0.0)
        .collect();
    // Rows are sorted by meter id, so index order is id order.
    scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| (a.0, a.1).cmp(&(b.0, b.1))));

    let pairs: BTreeSet<(usize, usize)> = match strategy {
        CandidateStrategy::MinimumSpanningTree => {
            let mut components = UnionFind::new(n);
            scored
                .iter()
                .filter(|&&(i, j, _)| components.union(i, j))
                .map(|&(i, j, _)| (i, j))
                .collect()
        }
        CandidateStrategy::NearestNeighbors { k } => {
            let mut neighbors: Vec<Vec<usize>> = vec![vec![]; n];
            for &(i, j, _) in &scored {
                neighbors[i].push(j);
                neighbors[j].push(i);
            }
            neighbors
                .iter()
                .enumerate()
                .flat_map(|(i, peers)| peers.iter().take(k).map(move |&j| (i.min(j), i.max(j))))
                .collect()
        }
    };

    pairs.into_iter().collect()
}

/// Returns true if `upstream` looks like it measures the feed of
/// `downstream`.
fn feeds(upstream: &[Option<GridSample>], downstream: &[Option<GridSample>], tolerance: f64) -> bool {
    let Some(ratio) = profile::dominance(upstream, downstream) else {
        return false;
    };
    let (up, down) = profile::paired_values(upstream, downstream, Channel::ActivePower);
    match (profile::mean(&up), profile::mean(&down)) {
        (Some(up), Some(down)) => {
            ratio >= DOMINANCE_RATIO && up > 0.0 && up > down.abs() * (1.0 + tolerance)
        }
        _ => false,
    }
}

/// Tests two siblings against the first anchor that dominates both of them.
///
/// Returns the summed power in excess of the anchor, relative to the anchor.
fn sibling_residual(
    a: &AlignedProfile,
    b: &AlignedProfile,
    anchors: &[AlignedProfile],
) -> Option<f64> {
    let anchor = anchors.iter().find(|anchor| {
        [a, b].iter().all(|m| {
            profile::dominance(anchor.samples(), m.samples())
                .is_some_and(|ratio| ratio >= DOMINANCE_RATIO)
        })
    })?;

    let siblings = profile::aggregate(&[a.samples(), b.samples()]);
    let (reference, sum) = profile::paired_values(anchor.samples(), &siblings, Channel::ActivePower);
    let scale: f64 = reference.iter().map(|v| v.abs()).sum();
    if scale <= f64::EPSILON {
        return None;
    }
    let excess: f64 = reference
        .iter()
        .zip(&sum)
        .map(|(r, s)| (s - r).max(0.0))
        .sum();
    Some(excess / scale)
}
