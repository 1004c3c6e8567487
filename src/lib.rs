// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

/*!
# Grid Topology Inference

This is a library for reconstructing the physical connectivity of a low or
medium voltage network (which metering points share a line, how lines group
into feeders and substations) purely from historical measurements of active
power, reactive power and voltage at each metering point.

Meters that hang off the same line see the same voltage sags and rises, and
the power measured upstream has to match the sum of the power measured
downstream.  The library combines both observations into a radial
[`TopologyGraph`].

## The `Measurement` trait

The main entry point is the [`TopologyEngine`], which can be fed with
[`Meter`]s directly through [`run`][TopologyEngine::run], or with an iterator
of raw telemetry rows through
[`run_measurements`][TopologyEngine::run_measurements].

But because this is an independent library, it doesn't know about the row
types of the measurement stores it is used with, and instead uses a trait to
interact with them.

Therefore, to be usable with this library, the row types must implement the
[`Measurement`] trait.  Check out the documentation of the trait for a sample
implementation, or use the bundled [`MeasurementRecord`].

## Stages

A run goes through the following stages, tracked by [`RunState`]:

- The meters are resampled onto a common time grid.  Meters with too many
  gaps or too few samples are left out and reported as
  [`DataQualityWarning`]s.
- A [`SimilarityMatrix`] is computed, mostly from the correlation of the
  voltage profiles.
- [`CandidateEdge`]s are picked from the matrix, and checked for power
  balance.
- The candidates are greedily merged into a [`ClusterForest`], highest
  confidence first, never closing a loop.
- The forest is checked for power balance, voltage monotonicity and the
  uniqueness of meters.  Broken rules become [`Violation`]s, the forest isn't
  changed.
- The forest is turned into a [`TopologyGraph`] of substations, feeders and
  meters.

Data-quality warnings and violations don't fail a run.  A run fails with an
[`Error`] only if it can't produce a result at all, for example because fewer
than two meters are usable, or when it is cancelled through a
[`CancellationFlag`].

## Validation

The [`TopologyGraph`] is checked on creation, ensuring that:

- There are no cycles in the graph.
- Every node has at most one parent.
- All nodes are reachable from a root.
- Meters are leaves, substations are roots and feeders are neither.
*/

mod config;
pub use config::{CandidateStrategy, TimeWindow, TopologyConfig};

mod error;
pub use error::{Error, ErrorKind};

mod measurement;
pub use measurement::{group_measurements, Measurement, MeasurementRecord, Meter, Sample};

mod profile;
pub use profile::{AlignedProfile, Channel, GridSample, Series, TimeGrid};

mod normalizer;
pub use normalizer::{align, AlignedProfiles};

mod similarity;
pub use similarity::SimilarityMatrix;

mod inference;
pub use inference::{rank_candidates, BalanceCheck, CandidateEdge, EdgeRole};

mod clustering;
pub use clustering::{Cluster, ClusterForest, ClusterId, StopReason};

mod validator;
pub use validator::{validate, AnchorAssignment, ValidationReport};

mod node_kind;
pub use node_kind::NodeKind;

mod topology;
pub use topology::{iterators, Line, TopologyGraph, TopologyNode};

mod engine;
pub use engine::{CancellationFlag, ProgressCallback, RunState, TopologyEngine, TopologyRun};

pub mod report;
pub use report::{DataQualityIssue, DataQualityWarning, Rule, Violation};

#[cfg(test)]
mod test_utils;
