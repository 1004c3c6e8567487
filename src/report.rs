// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Non-fatal findings of a run: data-quality warnings attached to meters and
//! constraint violations attached to clusters.

use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::ClusterId;

/// A data-quality problem found on a single meter.
#[derive(Clone, Debug, PartialEq)]
pub enum DataQualityIssue {
    /// More grid slots are missing than the gap tolerance allows.
    ExcessiveGaps { missing_fraction: f64 },
    /// Not enough raw samples inside the window.
    TooFewSamples { count: usize },
    /// The voltage profile is flat, most likely a stuck sensor.
    ZeroVariance,
    /// A second sample with the same timestamp was dropped.
    DuplicateTimestamp { timestamp: DateTime<Utc> },
    /// A sample with a NaN or infinite value was dropped.
    NonFiniteSample { timestamp: DateTime<Utc> },
}

/// A data-quality warning for a meter (or anchor).
#[derive(Clone, Debug, PartialEq)]
pub struct DataQualityWarning {
    pub meter_id: String,
    pub issue: DataQualityIssue,
}

impl DataQualityWarning {
    pub(crate) fn new(meter_id: impl Into<String>, issue: DataQualityIssue) -> Self {
        Self {
            meter_id: meter_id.into(),
            issue,
        }
    }

    /// Returns true if the warning caused the meter to be left out of the run.
    pub fn excludes_meter(&self) -> bool {
        matches!(
            self.issue,
            DataQualityIssue::ExcessiveGaps { .. } | DataQualityIssue::TooFewSamples { .. }
        )
    }
}

impl Display for DataQualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.issue {
            DataQualityIssue::ExcessiveGaps { missing_fraction } => write!(
                f,
                "{}: {:.1}% of the grid is missing",
                self.meter_id,
                missing_fraction * 100.0
            ),
            DataQualityIssue::TooFewSamples { count } => {
                write!(f, "{}: only {} samples in the window", self.meter_id, count)
            }
            DataQualityIssue::ZeroVariance => {
                write!(f, "{}: voltage profile has no variance", self.meter_id)
            }
            DataQualityIssue::DuplicateTimestamp { timestamp } => {
                write!(f, "{}: duplicate sample at {}", self.meter_id, timestamp)
            }
            DataQualityIssue::NonFiniteSample { timestamp } => {
                write!(f, "{}: non-finite sample at {}", self.meter_id, timestamp)
            }
        }
    }
}

/// The physical rule that a cluster violates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rule {
    /// Summed child P/Q doesn't match the cluster's own measurement.
    PowerBalance,
    /// Voltage rises moving away from the source.
    VoltageMonotonicity,
    /// A meter isn't assigned to exactly one leaf.
    Uniqueness,
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::PowerBalance => write!(f, "PowerBalance"),
            Rule::VoltageMonotonicity => write!(f, "VoltageMonotonicity"),
            Rule::Uniqueness => write!(f, "Uniqueness"),
        }
    }
}

/// A constraint violation attached to a single cluster.
///
/// The `magnitude` is rule specific: a relative residual for
/// [`Rule::PowerBalance`], an excess in volts for
/// [`Rule::VoltageMonotonicity`] and an appearance count for
/// [`Rule::Uniqueness`].
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub cluster: ClusterId,
    pub rule: Rule,
    pub magnitude: f64,
}

impl Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({:.4})", self.cluster, self.rule, self.magnitude)
    }
}
