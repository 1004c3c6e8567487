// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module contains the configuration options for a topology inference
//! run.

use chrono::{DateTime, TimeDelta, Utc};

use crate::Error;

/// How candidate edges are derived from the similarity matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CandidateStrategy {
    /// The minimum spanning tree over `1 - similarity` distances.
    MinimumSpanningTree,
    /// The `k` most similar peers of every meter.
    NearestNeighbors { k: usize },
}

/// A closed time interval that restricts which samples are considered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Configuration options for a topology inference run.
#[derive(Clone, Debug)]
pub struct TopologyConfig {
    /// Weight of the voltage-profile correlation in the similarity score.
    pub voltage_weight: f64,

    /// Weight of the active-power correlation in the similarity score.
    pub power_weight: f64,

    /// Interval of the common time grid that all profiles are resampled to.
    pub resample_interval: TimeDelta,

    /// Raw samples further apart than this are not interpolated between, and
    /// the grid slots in between are considered missing.
    pub max_interpolation_gap: TimeDelta,

    /// Restricts the run to samples inside this window.  When `None`, the
    /// union of all meters' sample spans is used.
    pub window: Option<TimeWindow>,

    /// Meters with a larger fraction of missing grid slots are excluded.
    pub gap_tolerance: f64,

    /// Meters with fewer raw samples in the window are excluded.  This is also
    /// the minimum number of shared grid slots for a pair to be comparable.
    pub min_samples: usize,

    /// Voltage profiles with a standard deviation below this value (in volts)
    /// are considered stuck sensors.
    pub min_voltage_spread: f64,

    /// How to pick candidate edges from the similarity matrix.
    pub candidate_strategy: CandidateStrategy,

    /// Allowed relative mismatch between an upstream measurement and the sum
    /// of its downstream measurements.
    pub power_balance_tolerance: f64,

    /// Factor applied to the confidence of candidate edges that fail their
    /// power-balance test.
    pub balance_penalty: f64,

    /// Candidate edges below this confidence are never merged.
    pub min_confidence: f64,

    /// Maximum number of cluster levels above the meters.
    pub max_depth: usize,

    /// A merge whose confidence is this close to an existing cluster's merge
    /// confidence extends that cluster instead of nesting it.
    pub merge_tolerance: f64,

    /// How far (in volts) a downstream voltage may rise above its upstream
    /// reference before it is reported.
    pub voltage_noise_margin: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            voltage_weight: 0.8,
            power_weight: 0.2,
            resample_interval: TimeDelta::minutes(15),
            max_interpolation_gap: TimeDelta::minutes(45),
            window: None,
            gap_tolerance: 0.2,
            min_samples: 8,
            min_voltage_spread: 1e-6,
            candidate_strategy: CandidateStrategy::NearestNeighbors { k: 3 },
            power_balance_tolerance: 0.05,
            balance_penalty: 0.5,
            min_confidence: 0.3,
            max_depth: 8,
            merge_tolerance: 0.01,
            voltage_noise_margin: 0.5,
        }
    }
}

impl TopologyConfig {
    /// Checks that all options are within their valid ranges.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, weight) in [
            ("voltage_weight", self.voltage_weight),
            ("power_weight", self.power_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::configuration(format!(
                    "{name} must be a non-negative number, got {weight}."
                )));
            }
        }
        if self.voltage_weight + self.power_weight <= 0.0 {
            return Err(Error::configuration(
                "At least one of voltage_weight and power_weight must be positive.",
            ));
        }

        if self.resample_interval <= TimeDelta::zero() {
            return Err(Error::configuration(format!(
                "resample_interval must be positive, got {}.",
                self.resample_interval
            )));
        }
        if self.resample_interval.subsec_nanos() % 1_000_000 != 0 {
            return Err(Error::configuration(format!(
                "resample_interval must be a whole number of milliseconds, got {}.",
                self.resample_interval
            )));
        }
        if self.max_interpolation_gap < self.resample_interval {
            return Err(Error::configuration(format!(
                "max_interpolation_gap ({}) can't be shorter than resample_interval ({}).",
                self.max_interpolation_gap, self.resample_interval
            )));
        }
        if let Some(window) = &self.window {
            if window.start >= window.end {
                return Err(Error::configuration(format!(
                    "Window start {} must be before its end {}.",
                    window.start, window.end
                )));
            }
        }

        ensure_ratio("gap_tolerance", self.gap_tolerance, false)?;
        ensure_ratio("balance_penalty", self.balance_penalty, true)?;
        ensure_ratio("min_confidence", self.min_confidence, true)?;
        ensure_ratio("merge_tolerance", self.merge_tolerance, false)?;

        for (name, value) in [
            ("power_balance_tolerance", self.power_balance_tolerance),
            ("min_voltage_spread", self.min_voltage_spread),
            ("voltage_noise_margin", self.voltage_noise_margin),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::configuration(format!(
                    "{name} must be a non-negative number, got {value}."
                )));
            }
        }

        if self.min_samples < 2 {
            return Err(Error::configuration(format!(
                "min_samples must be at least 2, got {}.",
                self.min_samples
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::configuration("max_depth must be at least 1."));
        }
        if let CandidateStrategy::NearestNeighbors { k: 0 } = self.candidate_strategy {
            return Err(Error::configuration(
                "NearestNeighbors needs at least one neighbor per meter.",
            ));
        }

        Ok(())
    }
}

/// Checks that `value` is in `[0, 1)`, or in `[0, 1]` when `allow_one` is set.
fn ensure_ratio(name: &str, value: f64, allow_one: bool) -> Result<(), Error> {
    let in_range = value >= 0.0 && (value < 1.0 || (allow_one && value == 1.0));
    if !in_range {
        let upper = if allow_one { "1]" } else { "1)" };
        return Err(Error::configuration(format!(
            "{name} must be in [0, {upper}, got {value}."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(TopologyConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_out_of_range_options() {
        let config = TopologyConfig {
            voltage_weight: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err_and(|e| e
            == Error::configuration("voltage_weight must be a non-negative number, got -1.")));

        let config = TopologyConfig {
            voltage_weight: 0.0,
            power_weight: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err_and(|e| e
            == Error::configuration(
                "At least one of voltage_weight and power_weight must be positive."
            )));

        let config = TopologyConfig {
            gap_tolerance: 1.0,
            ..Default::default()
        };
        assert!(config
            .validate()
            .is_err_and(|e| e == Error::configuration("gap_tolerance must be in [0, 1), got 1.")));

        let config = TopologyConfig {
            power_balance_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TopologyConfig {
            max_depth: 0,
            ..Default::default()
        };
        assert!(config
            .validate()
            .is_err_and(|e| e == Error::configuration("max_depth must be at least 1.")));

        let config = TopologyConfig {
            candidate_strategy: CandidateStrategy::NearestNeighbors { k: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TopologyConfig {
            resample_interval: TimeDelta::microseconds(500),
            ..Default::default()
        };
        assert!(config.validate().is_err_and(|e| e.kind() == ErrorKind::Configuration
            && e.description()
                .starts_with("resample_interval must be a whole number of milliseconds")));

        let config = TopologyConfig {
            resample_interval: TimeDelta::microseconds(1_500),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TopologyConfig {
            resample_interval: TimeDelta::milliseconds(250),
            max_interpolation_gap: TimeDelta::seconds(1),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));

        let config = TopologyConfig {
            resample_interval: TimeDelta::minutes(30),
            max_interpolation_gap: TimeDelta::minutes(15),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_order() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let config = TopologyConfig {
            window: Some(TimeWindow { start, end: start }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TopologyConfig {
            window: Some(TimeWindow {
                start,
                end: start + TimeDelta::days(1),
            }),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
