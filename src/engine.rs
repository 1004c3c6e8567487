// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! The engine that drives one topology inference run through all its stages.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::inference::{rank_candidates, CandidateEdge};
use crate::profile::{AlignedProfile, TimeGrid};
use crate::report::DataQualityWarning;
use crate::validator::{self, ValidationReport};
use crate::{
    group_measurements, normalizer, ClusterForest, Error, Measurement, Meter, SimilarityMatrix,
    TopologyConfig, TopologyGraph,
};

/// The stages of a run.
///
/// A run moves forward through the stages in declaration order, and ends in
/// one of `Done`, `Failed` or `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    ProfilesAligned,
    SimilaritiesComputed,
    CandidatesRanked,
    TreeBuilt,
    Validated,
    Done,
    Failed,
    Cancelled,
}

impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Initialized => write!(f, "INITIALIZED"),
            RunState::ProfilesAligned => write!(f, "PROFILES_ALIGNED"),
            RunState::SimilaritiesComputed => write!(f, "SIMILARITIES_COMPUTED"),
            RunState::CandidatesRanked => write!(f, "CANDIDATES_RANKED"),
            RunState::TreeBuilt => write!(f, "TREE_BUILT"),
            RunState::Validated => write!(f, "VALIDATED"),
            RunState::Done => write!(f, "DONE"),
            RunState::Failed => write!(f, "FAILED"),
            RunState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A flag for cancelling a run from another thread.
///
/// Clones share the same flag.  The engine checks it between stages.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the runs holding this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Called with the new state every time a run advances to the next stage.
pub type ProgressCallback = Arc<dyn Fn(RunState) + Send + Sync>;

/// Everything a completed run produced.
#[derive(Clone, Debug)]
pub struct TopologyRun {
    pub grid: TimeGrid,
    /// The meters that took part in the run, sorted by id.
    pub profiles: Vec<AlignedProfile>,
    pub anchors: Vec<AlignedProfile>,
    pub similarities: SimilarityMatrix,
    /// Candidate edges in rank order.
    pub candidates: Vec<CandidateEdge>,
    pub forest: ClusterForest,
    pub report: ValidationReport,
    pub graph: TopologyGraph,
    pub warnings: Vec<DataQualityWarning>,
    pub notes: Vec<String>,
}

/// Reconstructs a network topology from historical measurements.
///
/// An engine performs a single run.
pub struct TopologyEngine {
    config: TopologyConfig,
    state: RunState,
    cancellation: CancellationFlag,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for TopologyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl TopologyEngine {
    /// Creates a new engine.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn try_new(config: TopologyConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            state: RunState::Initialized,
            cancellation: CancellationFlag::new(),
            progress_callback: None,
        })
    }

    /// Makes the engine observe the given cancellation flag.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    /// Registers a callback that is told about every stage the run reaches.
    ///
    /// The callback runs on the thread driving the run, between stages.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(RunState) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Groups raw measurements into meters and anchors, and runs the
    /// inference on them.
    ///
    /// Samples dropped while grouping are reported among the warnings of the
    /// run.
    pub fn run_measurements<M: Measurement, A: Measurement>(
        &mut self,
        measurements: impl IntoIterator<Item = M>,
        anchor_measurements: impl IntoIterator<Item = A>,
    ) -> Result<TopologyRun, Error> {
        self.ensure_fresh()?;
        let grouped = group_measurements(measurements).and_then(|(meters, mut warnings)| {
            let (anchors, anchor_warnings) = group_measurements(anchor_measurements)?;
            warnings.extend(anchor_warnings);
            Ok((meters, anchors, warnings))
        });
        let (meters, anchors, warnings) = self.fail_on_error(grouped)?;
        self.execute(&meters, &anchors, warnings)
    }

    /// Runs the inference on the given meters.
    ///
    /// `anchors` are optional upstream measurements, like substation
    /// transformers, that the inferred trees are checked against.
    pub fn run(&mut self, meters: &[Meter], anchors: &[Meter]) -> Result<TopologyRun, Error> {
        self.ensure_fresh()?;
        self.execute(meters, anchors, vec![])
    }

    fn ensure_fresh(&self) -> Result<(), Error> {
        if self.state != RunState::Initialized {
            return Err(Error::internal(format!(
                "The engine has already run and is {}.",
                self.state
            )));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        meters: &[Meter],
        anchors: &[Meter],
        mut warnings: Vec<DataQualityWarning>,
    ) -> Result<TopologyRun, Error> {
        self.check_cancelled()?;
        self.fail_on_error(ensure_unique_ids(meters, anchors))?;

        let aligned = self.fail_on_error(normalizer::align(meters, anchors, &self.config))?;
        warnings.extend(aligned.warnings);
        if aligned.profiles.len() < 2 {
            self.state = RunState::Failed;
            return Err(Error::insufficient_input(format!(
                "At least 2 usable meters are needed, found {}.",
                aligned.profiles.len()
            )));
        }
        let (grid, profiles, anchors) = (aligned.grid, aligned.profiles, aligned.anchors);
        self.advance(RunState::ProfilesAligned)?;

        let (similarities, flat) = SimilarityMatrix::compute(&profiles, &self.config);
        warnings.extend(flat);
        self.advance(RunState::SimilaritiesComputed)?;

        let candidates = rank_candidates(&similarities, &profiles, &anchors, &self.config);
        self.advance(RunState::CandidatesRanked)?;

        let forest = self.fail_on_error(ClusterForest::try_new(
            &candidates,
            &profiles,
            &self.config,
        ))?;
        self.advance(RunState::TreeBuilt)?;

        let report = self.fail_on_error(validator::validate(
            &forest,
            &profiles,
            &anchors,
            &self.config,
        ))?;
        self.advance(RunState::Validated)?;

        let graph = self.fail_on_error(TopologyGraph::try_from_forest(&forest))?;
        let notes = forest.notes().to_vec();
        self.advance(RunState::Done)?;

        Ok(TopologyRun {
            grid,
            profiles,
            anchors,
            similarities,
            candidates,
            forest,
            report,
            graph,
            warnings,
            notes,
        })
    }

    fn check_cancelled(&mut self) -> Result<(), Error> {
        if self.cancellation.is_cancelled() {
            tracing::debug!("Topology run cancelled while {}.", self.state);
            let error = Error::cancelled(format!("Run cancelled while {}.", self.state));
            self.state = RunState::Cancelled;
            return Err(error);
        }
        Ok(())
    }

    fn advance(&mut self, next: RunState) -> Result<(), Error> {
        self.check_cancelled()?;
        tracing::debug!("Topology run: {} -> {}", self.state, next);
        self.state = next;
        if let Some(callback) = &self.progress_callback {
            callback(next);
        }
        Ok(())
    }

    fn fail_on_error<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            tracing::debug!("Topology run failed while {}: {}", self.state, err);
            self.state = RunState::Failed;
        }
        result
    }
}

fn ensure_unique_ids(meters: &[Meter], anchors: &[Meter]) -> Result<(), Error> {
    let mut seen = BTreeSet::new();
    for id in meters.iter().chain(anchors).map(|m| m.id()) {
        if !seen.insert(id) {
            return Err(Error::invalid_input(format!("Duplicate meter id found: {id}")));
        }
    }
    Ok(())
}
