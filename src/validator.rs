// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Physical plausibility checks on a cluster forest.
//!
//! The forest is never modified here.  Every broken rule becomes a
//! [`Violation`] attached to the offending cluster, and it is up to the
//! caller to decide what to do about them.

use std::collections::{BTreeMap, BTreeSet};

use crate::profile::{self, AlignedProfile, Channel, GridSample};
use crate::report::{Rule, Violation};
use crate::{ClusterForest, ClusterId, Error, TopologyConfig};

/// An anchor measurement matched to a root of the forest.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorAssignment {
    pub anchor_id: String,
    pub cluster: ClusterId,
    /// The power-balance residual between the anchor and the root.
    pub residual: f64,
}

/// The outcome of validating a cluster forest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub anchor_assignments: Vec<AnchorAssignment>,
}

impl ValidationReport {
    /// Returns true if no rule was violated.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns the violations attached to the given cluster.
    pub fn violations_for(&self, cluster: ClusterId) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.cluster == cluster)
    }

    /// Returns the id of the anchor assigned to the given cluster.
    pub fn anchor_of(&self, cluster: ClusterId) -> Option<&str> {
        self.anchor_assignments
            .iter()
            .find(|a| a.cluster == cluster)
            .map(|a| a.anchor_id.as_str())
    }
}

/// Checks `forest` against the power-balance, voltage-monotonicity and
/// uniqueness rules.
///
/// `profiles` are the meters the forest was built from, and `anchors` the
/// upstream measurements to match against its roots.
pub fn validate(
    forest: &ClusterForest,
    profiles: &[AlignedProfile],
    anchors: &[AlignedProfile],
    config: &TopologyConfig,
) -> Result<ValidationReport, Error> {
    let mut report = ValidationReport {
        violations: vec![],
        anchor_assignments: assign_anchors(forest, anchors)?,
    };
    let anchor_profiles: BTreeMap<ClusterId, &[Option<GridSample>]> = report
        .anchor_assignments
        .iter()
        .filter_map(|assignment| {
            anchors
                .iter()
                .find(|a| a.meter_id() == assignment.anchor_id)
                .map(|a| (assignment.cluster, a.samples()))
        })
        .collect();

    check_power_balance(forest, &anchor_profiles, config, &mut report.violations)?;
    check_voltage_monotonicity(forest, &anchor_profiles, config, &mut report.violations)?;
    check_uniqueness(forest, profiles, &mut report.violations)?;

    report
        .violations
        .sort_by(|a, b| a.cluster.cmp(&b.cluster).then(a.rule.cmp(&b.rule)));
    for violation in &report.violations {
        tracing::warn!("Constraint violation: {}", violation);
    }
    tracing::debug!(
        "Validated {} clusters: {} violations, {} anchors assigned.",
        forest.clusters().count(),
        report.violations.len(),
        report.anchor_assignments.len()
    );

    Ok(report)
}

/// Matches anchors to roots greedily, smallest residual first.
fn assign_anchors(
    forest: &ClusterForest,
    anchors: &[AlignedProfile],
) -> Result<Vec<AnchorAssignment>, Error> {
    let mut scored = vec![];
    for anchor in anchors {
        for &root in forest.roots() {
            let total = forest.effective_profile(root)?;
            if let Some(residual) = profile::balance_residual(anchor.samples(), &[total]) {
                scored.push((residual, anchor.meter_id(), root));
            }
        }
    }
    scored.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut used_anchors = BTreeSet::new();
    let mut used_roots = BTreeSet::new();
    let mut assignments = vec![];
    for (residual, anchor_id, root) in scored {
        if used_anchors.contains(anchor_id) || used_roots.contains(&root) {
            continue;
        }
        used_anchors.insert(anchor_id);
        used_roots.insert(root);
        tracing::debug!("Anchor {} assigned to {} ({:.4}).", anchor_id, root, residual);
        assignments.push(AnchorAssignment {
            anchor_id: anchor_id.to_string(),
            cluster: root,
            residual,
        });
    }
    assignments.sort_by(|a, b| a.anchor_id.cmp(&b.anchor_id));

    Ok(assignments)
}

/// Returns the measurement a cluster is expected to match: its anchor, or
/// failing that, its head meter.
fn reference<'a>(
    forest: &'a ClusterForest,
    cluster: ClusterId,
    anchors: &BTreeMap<ClusterId, &'a [Option<GridSample>]>,
) -> Result<Option<&'a [Option<GridSample>]>, Error> {
    if let Some(&anchor) = anchors.get(&cluster) {
        return Ok(Some(anchor));
    }
    match forest.cluster(cluster)?.head() {
        Some(head) => Ok(Some(forest.leaf(head)?.aggregate())),
        None => Ok(None),
    }
}

fn check_power_balance(
    forest: &ClusterForest,
    anchors: &BTreeMap<ClusterId, &[Option<GridSample>]>,
    config: &TopologyConfig,
    violations: &mut Vec<Violation>,
) -> Result<(), Error> {
    for cluster in forest.clusters().filter(|c| !c.is_leaf()) {
        let Some(expected) = reference(forest, cluster.id(), anchors)? else {
            continue;
        };
        let mut parts = vec![];
        for &child in cluster.children() {
            let child_cluster = forest.cluster(child)?;
            if child_cluster.is_leaf() && child_cluster.meter_id() == cluster.head() {
                continue;
            }
            parts.push(forest.effective_profile(child)?);
        }
        if let Some(residual) = profile::balance_residual(expected, &parts) {
            if residual > config.power_balance_tolerance {
                violations.push(Violation {
                    cluster: cluster.id(),
                    rule: Rule::PowerBalance,
                    magnitude: residual,
                });
            }
        }
    }
    Ok(())
}

/// Mean of `child - reference` voltage over the shared slots.
fn voltage_excess(child: &[Option<GridSample>], reference: &[Option<GridSample>]) -> Option<f64> {
    let (child, reference) = profile::paired_values(child, reference, Channel::Voltage);
    let diffs: Vec<f64> = child.iter().zip(&reference).map(|(c, r)| c - r).collect();
    profile::mean(&diffs)
}

fn check_voltage_monotonicity(
    forest: &ClusterForest,
    anchors: &BTreeMap<ClusterId, &[Option<GridSample>]>,
    config: &TopologyConfig,
    violations: &mut Vec<Violation>,
) -> Result<(), Error> {
    let mut stack: Vec<(ClusterId, Option<&[Option<GridSample>]>)> = vec![];
    for &root in forest.roots().iter().rev() {
        stack.push((root, reference(forest, root, anchors)?));
    }

    while let Some((id, upstream)) = stack.pop() {
        let cluster = forest.cluster(id)?;
        for &child in cluster.children().iter().rev() {
            let child_cluster = forest.cluster(child)?;
            let own = if child_cluster.is_leaf() {
                Some(child_cluster.aggregate())
            } else {
                reference(forest, child, anchors)?
            };

            if let (Some(own), Some(upstream)) = (own, upstream) {
                if let Some(excess) = voltage_excess(own, upstream) {
                    if excess > config.voltage_noise_margin {
                        violations.push(Violation {
                            cluster: child,
                            rule: Rule::VoltageMonotonicity,
                            magnitude: excess,
                        });
                    }
                }
            }
            if !child_cluster.is_leaf() {
                stack.push((child, own.or(upstream)));
            }
        }
    }
    Ok(())
}

fn check_uniqueness(
    forest: &ClusterForest,
    profiles: &[AlignedProfile],
    violations: &mut Vec<Violation>,
) -> Result<(), Error> {
    let mut appearances: BTreeMap<&str, usize> = BTreeMap::new();
    for &root in forest.roots() {
        for leaf in forest.leaves_under(root)? {
            if let Some(meter_id) = leaf.meter_id() {
                *appearances.entry(meter_id).or_default() += 1;
            }
        }
    }

    for profile in profiles {
        let leaf = forest.leaf(profile.meter_id()).map_err(|_| {
            Error::invalid_input(format!(
                "Meter {} is not part of the cluster forest.",
                profile.meter_id()
            ))
        })?;
        let count = appearances.get(profile.meter_id()).copied().unwrap_or(0);
        if count != 1 {
            violations.push(Violation {
                cluster: leaf.id(),
                rule: Rule::Uniqueness,
                magnitude: count as f64,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BalanceCheck, CandidateEdge, EdgeRole};

    fn profile(id: &str, power: f64, voltage: f64) -> AlignedProfile {
        AlignedProfile::new(
            id,
            vec![
                Some(GridSample {
                    active_power: power,
                    reactive_power: 0.0,
                    voltage,
                });
                4
            ],
        )
    }

    fn edge(a: &str, b: &str, confidence: f64, upstream: Option<&str>) -> CandidateEdge {
        CandidateEdge {
            meter_a: a.to_string(),
            meter_b: b.to_string(),
            similarity: confidence,
            confidence,
            role: match upstream {
                Some(upstream) => EdgeRole::Feeds {
                    upstream: upstream.to_string(),
                },
                None => EdgeRole::Sibling,
            },
            balance: BalanceCheck::NotApplicable,
        }
    }

    fn headed(head_power: f64, y_voltage: f64) -> Result<(Vec<AlignedProfile>, ClusterForest), Error> {
        let profiles = vec![
            profile("head", head_power, 231.0),
            profile("x", 1.0, 230.0),
            profile("y", 1.0, y_voltage),
        ];
        let candidates = vec![
            edge("head", "x", 1.0, Some("head")),
            edge("head", "y", 1.0, Some("head")),
        ];
        let forest = ClusterForest::try_new(&candidates, &profiles, &TopologyConfig::default())?;
        Ok((profiles, forest))
    }

    #[test]
    fn test_power_balance() -> Result<(), Error> {
        let config = TopologyConfig::default();

        let (profiles, forest) = headed(2.0, 230.0)?;
        let report = validate(&forest, &profiles, &[], &config)?;
        assert!(report.is_clean());
        assert!(report.anchor_assignments.is_empty());

        let (profiles, forest) = headed(3.0, 230.0)?;
        let report = validate(&forest, &profiles, &[], &config)?;
        let root = forest.roots()[0];
        assert_eq!(report.violations.len(), 1);
        let violation = &report.violations[0];
        assert_eq!(violation.cluster, root);
        assert_eq!(violation.rule, Rule::PowerBalance);
        assert!((violation.magnitude - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.violations_for(root).count(), 1);

        Ok(())
    }

    #[test]
    fn test_voltage_monotonicity() -> Result<(), Error> {
        let (profiles, forest) = headed(2.0, 232.0)?;
        let report = validate(&forest, &profiles, &[], &TopologyConfig::default())?;

        let y = forest.leaf("y")?.id();
        assert_eq!(
            report.violations,
            vec![Violation {
                cluster: y,
                rule: Rule::VoltageMonotonicity,
                magnitude: 1.0,
            }]
        );

        let config = TopologyConfig {
            voltage_noise_margin: 1.5,
            ..Default::default()
        };
        assert!(validate(&forest, &profiles, &[], &config)?.is_clean());

        Ok(())
    }

    #[test]
    fn test_anchor_assignment() -> Result<(), Error> {
        let profiles = vec![
            profile("a", 1.0, 230.0),
            profile("b", 2.0, 230.0),
            profile("c", 4.0, 230.0),
            profile("d", 5.0, 230.0),
        ];
        let candidates = vec![
            edge("a", "b", 0.9, None),
            edge("c", "d", 0.9, None),
            edge("a", "c", 0.1, None),
        ];
        let forest = ClusterForest::try_new(&candidates, &profiles, &TopologyConfig::default())?;
        let (ab, cd) = (forest.roots()[0], forest.roots()[1]);
        assert_eq!(forest.leaf("a")?.parent(), Some(ab));

        let anchors = vec![profile("sub-2", 10.0, 232.0), profile("sub-1", 3.0, 232.0)];
        let report = validate(&forest, &profiles, &anchors, &TopologyConfig::default())?;

        assert_eq!(report.anchor_assignments.len(), 2);
        assert_eq!(report.anchor_of(ab), Some("sub-1"));
        assert_eq!(report.anchor_of(cd), Some("sub-2"));
        assert_eq!(report.anchor_assignments[0].residual, 0.0);

        // sub-2 sees 10 kW, the meters below it only 9.
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].cluster, cd);
        assert_eq!(report.violations[0].rule, Rule::PowerBalance);
        assert!((report.violations[0].magnitude - 0.1).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn test_unknown_meter() -> Result<(), Error> {
        let (mut profiles, forest) = headed(2.0, 230.0)?;
        profiles.push(profile("stranger", 1.0, 230.0));
        assert!(
            validate(&forest, &profiles, &[], &TopologyConfig::default()).is_err_and(
                |e| e == Error::invalid_input("Meter stranger is not part of the cluster forest.")
            )
        );
        Ok(())
    }
}
