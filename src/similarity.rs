// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Pairwise electrical similarity between aligned profiles.
//!
//! Meters that share upstream impedance see the same voltage sags and rises,
//! so the primary signal is the correlation of their z-scored voltage
//! profiles.  Active-power correlation can be blended in, but it mostly
//! reflects similar load behavior rather than wiring.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::profile::{self, AlignedProfile, Channel};
use crate::report::{DataQualityIssue, DataQualityWarning};
use crate::TopologyConfig;

/// A symmetric matrix of similarity scores in `[0, 1]`.
///
/// Rows and columns follow the order of the profiles the matrix was computed
/// from, which is sorted by meter id.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityMatrix {
    meter_ids: Vec<String>,
    scores: Vec<f64>,
    defined: Vec<bool>,
    low_quality: Vec<String>,
}

impl SimilarityMatrix {
    /// Computes the similarity of every pair of profiles.
    ///
    /// Meters with a flat voltage profile are flagged and get a similarity of
    /// 0 with all their peers, as do pairs with too few shared samples.
    pub fn compute(
        profiles: &[AlignedProfile],
        config: &TopologyConfig,
    ) -> (Self, Vec<DataQualityWarning>) {
        let n = profiles.len();

        let mut warnings = vec![];
        let flat: Vec<bool> = profiles
            .iter()
            .map(|p| {
                let voltages: Vec<f64> = p.samples().iter().flatten().map(|s| s.voltage).collect();
                let is_flat =
                    profile::std_dev(&voltages).map_or(true, |sd| sd < config.min_voltage_spread);
                if is_flat {
                    tracing::warn!("Meter {} has a flat voltage profile.", p.meter_id());
                    warnings.push(DataQualityWarning::new(
                        p.meter_id(),
                        DataQualityIssue::ZeroVariance,
                    ));
                }
                is_flat
            })
            .collect();

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        let score = |&(i, j): &(usize, usize)| {
            if flat[i] || flat[j] {
                return (i, j, None);
            }
            (i, j, pair_similarity(&profiles[i], &profiles[j], config))
        };

        #[cfg(feature = "parallel")]
        let cells: Vec<(usize, usize, Option<f64>)> = pairs.par_iter().map(score).collect();
        #[cfg(not(feature = "parallel"))]
        let cells: Vec<(usize, usize, Option<f64>)> = pairs.iter().map(score).collect();

        let mut matrix = Self {
            meter_ids: profiles.iter().map(|p| p.meter_id().to_string()).collect(),
            scores: vec![0.0; n * n],
            defined: vec![false; n * n],
            low_quality: profiles
                .iter()
                .zip(&flat)
                .filter(|(_, is_flat)| **is_flat)
                .map(|(p, _)| p.meter_id().to_string())
                .collect(),
        };
        let mut undefined = 0;
        for (i, j, value) in cells {
            match value {
                Some(value) => {
                    for (row, col) in [(i, j), (j, i)] {
                        matrix.scores[row * n + col] = value;
                        matrix.defined[row * n + col] = true;
                    }
                }
                None => undefined += 1,
            }
        }

        tracing::debug!(
            "Computed similarities for {} pairs of {} meters, {} undefined.",
            n * n.saturating_sub(1) / 2,
            n,
            undefined
        );

        (matrix, warnings)
    }

    /// Returns the number of meters in the matrix.
    pub fn len(&self) -> usize {
        self.meter_ids.len()
    }

    /// Returns true if the matrix has no meters.
    pub fn is_empty(&self) -> bool {
        self.meter_ids.is_empty()
    }

    /// Returns the meter ids, in row order.
    pub fn meter_ids(&self) -> &[String] {
        &self.meter_ids
    }

    /// Returns the row index of the given meter.
    pub fn index_of(&self, meter_id: &str) -> Option<usize> {
        self.meter_ids.iter().position(|id| id == meter_id)
    }

    /// Returns the score between the meters at rows `i` and `j`.
    ///
    /// The score of a meter with itself is undefined, and so is the score of
    /// an out-of-range index.
    pub fn score(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.len();
        if i == j || i >= n || j >= n {
            return None;
        }
        Some(self.scores[i * n + j])
    }

    /// Returns the score between two meters, by id.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.score(self.index_of(a)?, self.index_of(b)?)
    }

    /// Returns true if the score between rows `i` and `j` was computed from
    /// data, rather than falling back to 0.
    pub fn is_defined(&self, i: usize, j: usize) -> bool {
        let n = self.len();
        i != j && i < n && j < n && self.defined[i * n + j]
    }

    /// Returns the ids of the meters flagged as low quality.
    pub fn low_quality(&self) -> &[String] {
        &self.low_quality
    }
}

/// Returns the blended similarity of two profiles, or `None` if they can't be
/// compared.
fn pair_similarity(a: &AlignedProfile, b: &AlignedProfile, config: &TopologyConfig) -> Option<f64> {
    let (va, vb) = profile::paired_values(a.samples(), b.samples(), Channel::Voltage);
    if va.len() < config.min_samples {
        return None;
    }

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    if config.voltage_weight > 0.0 {
        if let Some(r) = profile::correlation(&va, &vb) {
            weighted += config.voltage_weight * r.max(0.0);
            total_weight += config.voltage_weight;
        }
    }
    if config.power_weight > 0.0 {
        let (pa, pb) = profile::paired_values(a.samples(), b.samples(), Channel::ActivePower);
        if let Some(r) = profile::correlation(&pa, &pb) {
            weighted += config.power_weight * r.max(0.0);
            total_weight += config.power_weight;
        }
    }

    if total_weight <= 0.0 {
        return None;
    }
    Some((weighted / total_weight).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::GridSample;

    fn profile(id: &str, voltage: impl Fn(usize) -> f64, power: impl Fn(usize) -> f64) -> AlignedProfile {
        let samples = (0..48)
            .map(|t| {
                Some(GridSample {
                    active_power: power(t),
                    reactive_power: 0.0,
                    voltage: voltage(t),
                })
            })
            .collect();
        AlignedProfile::new(id, samples)
    }

    fn wave(freq: f64, amplitude: f64) -> impl Fn(usize) -> f64 {
        move |t| 230.0 + amplitude * (std::f64::consts::TAU * freq * t as f64 / 48.0).sin()
    }

    #[test]
    fn test_similarity_scores() {
        let config = TopologyConfig {
            voltage_weight: 1.0,
            power_weight: 0.0,
            ..Default::default()
        };
        let profiles = vec![
            profile("a", wave(1.0, 2.0), |_| 1.0),
            profile("b", wave(1.0, 5.0), |_| 1.0),
            profile("c", |t| 460.0 - wave(1.0, 2.0)(t), |_| 1.0),
            profile("d", wave(3.0, 2.0), |_| 1.0),
        ];
        let (matrix, warnings) = SimilarityMatrix::compute(&profiles, &config);
        assert!(warnings.is_empty());
        assert_eq!(matrix.len(), 4);

        // Same shape, different amplitude.
        assert!(matrix.get("a", "b").is_some_and(|s| (s - 1.0).abs() < 1e-9));
        // Mirrored.
        assert!(matrix.get("a", "c").is_some_and(|s| s.abs() < 1e-9));
        // Orthogonal.
        assert!(matrix.get("a", "d").is_some_and(|s| s.abs() < 1e-9));

        assert_eq!(matrix.get("a", "a"), None);
        assert_eq!(matrix.get("a", "x"), None);
        assert!(matrix.is_defined(0, 1));
        assert!(!matrix.is_defined(1, 1));
    }

    #[test]
    fn test_symmetry() {
        let profiles: Vec<_> = (0..6)
            .map(|i| {
                profile(
                    &format!("m{i}"),
                    move |t| 230.0 + ((t * (i + 1)) % 7) as f64,
                    move |t| 1.0 + ((t + i) % 5) as f64,
                )
            })
            .collect();
        let (matrix, _) = SimilarityMatrix::compute(&profiles, &TopologyConfig::default());
        for i in 0..6 {
            for j in 0..6 {
                assert_eq!(matrix.score(i, j), matrix.score(j, i));
                if let Some(s) = matrix.score(i, j) {
                    assert!((0.0..=1.0).contains(&s));
                }
            }
        }
    }

    #[test]
    fn test_power_blend() {
        let config = TopologyConfig {
            voltage_weight: 0.5,
            power_weight: 0.5,
            ..Default::default()
        };
        let profiles = vec![
            profile("a", wave(1.0, 2.0), wave(2.0, 1.0)),
            profile("b", wave(1.0, 2.0), wave(5.0, 1.0)),
            profile("c", wave(1.0, 2.0), |_| 3.0),
        ];
        let (matrix, _) = SimilarityMatrix::compute(&profiles, &config);
        // Identical voltages, orthogonal powers.
        assert!(matrix.get("a", "b").is_some_and(|s| (s - 0.5).abs() < 1e-9));
        // Flat power only leaves the voltage term.
        assert!(matrix.get("a", "c").is_some_and(|s| (s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_flat_and_disjoint_profiles() {
        let config = TopologyConfig::default();
        let full = profile("full", wave(1.0, 2.0), |_| 1.0);
        let mut samples = full.samples().to_vec();
        samples[24..].fill(None);
        let half = AlignedProfile::new("half", samples);
        let mut samples = full.samples().to_vec();
        samples[..24].fill(None);
        let other_half = AlignedProfile::new("other-half", samples);

        let profiles = vec![
            profile("a", wave(1.0, 2.0), |_| 1.0),
            profile("stuck", |_| 230.0, |_| 1.0),
            half,
            other_half,
        ];
        let (matrix, warnings) = SimilarityMatrix::compute(&profiles, &config);

        assert_eq!(
            warnings,
            vec![DataQualityWarning::new("stuck", DataQualityIssue::ZeroVariance)]
        );
        assert_eq!(matrix.low_quality(), &["stuck".to_string()]);
        assert_eq!(matrix.get("a", "stuck"), Some(0.0));
        assert!(!matrix.is_defined(0, 1));

        // No overlap between the two halves.
        assert_eq!(matrix.get("half", "other-half"), Some(0.0));
        assert!(!matrix.is_defined(2, 3));
        assert!(matrix.get("a", "half").is_some_and(|s| s > 0.99));
    }
}
