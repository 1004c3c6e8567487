// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module is only compiled when running unit tests and contains the
//! `NetworkBuilder`, which can declaratively build synthetic networks of
//! meters for use in tests, and a few ready made networks.

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;

use crate::measurement::Sample;
use crate::{Error, Meter, TopologyConfig, TopologyEngine, TopologyRun};

/// Number of 15 minute slots in a day.
const SLOTS_PER_DAY: usize = 96;

/// Number of slots in a synthetic network: four days.
pub(crate) const SLOTS: usize = 4 * SLOTS_PER_DAY;

/// The angle of slot `k` within its day.
pub(crate) fn theta(k: usize) -> f64 {
    TAU * k as f64 / SLOTS_PER_DAY as f64
}

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

/// The voltage swing seen by every meter below the substation.
fn common_voltage(k: usize) -> f64 {
    8.0 * theta(k).sin()
}

/// The voltage profile of the meters on line a.
pub(crate) fn line_a_voltage(k: usize) -> f64 {
    230.0 + common_voltage(k) + 4.0 * (3.0 * theta(k)).sin() + 4.0 * (5.0 * theta(k)).sin()
}

/// The voltage profile of the meters on line b.
pub(crate) fn line_b_voltage(k: usize) -> f64 {
    230.0 + common_voltage(k) + 4.0 * (3.0 * theta(k)).cos() + 4.0 * (5.0 * theta(k)).cos()
}

/// The load shape of the meters on line a, with a mean of 1.
fn line_a_load(k: usize) -> f64 {
    1.0 + 0.25 * (2.0 * theta(k)).sin()
}

/// The load shape of the meters on line b, with a mean of 1.
fn line_b_load(k: usize) -> f64 {
    1.0 + 0.25 * (4.0 * theta(k)).cos()
}

/// A set of meters and anchors, ready to be fed to an engine.
pub(crate) struct SyntheticNetwork {
    meters: Vec<Meter>,
    anchors: Vec<Meter>,
}

impl SyntheticNetwork {
    pub(crate) fn meters(&self) -> &[Meter] {
        &self.meters
    }

    pub(crate) fn anchors(&self) -> &[Meter] {
        &self.anchors
    }

    /// Runs a fresh engine on the network.
    pub(crate) fn run(&self, config: &TopologyConfig) -> Result<TopologyRun, Error> {
        TopologyEngine::try_new(config.clone())?.run(&self.meters, &self.anchors)
    }

    /// A substation feeding two lines of two meters each.
    pub(crate) fn two_feeders() -> Self {
        Self::two_feeders_builder().build()
    }

    pub(crate) fn two_feeders_builder() -> NetworkBuilder {
        Self::two_lines_builder(
            &[("meter-a1", 10.0), ("meter-a2", 10.0)],
            &[("meter-b1", 8.0), ("meter-b2", 8.0)],
            1.0,
        )
    }

    /// A substation feeding two lines, with `(meter id, mean load in kW)`
    /// pairs for the meters of each line.
    ///
    /// Meters on a line share their voltage profile exactly.  Two thirds of
    /// the voltage variance comes from the substation, so meters on
    /// different lines have a voltage correlation of 2/3, and their load
    /// shapes are uncorrelated.  The substation anchor measures
    /// `anchor_scale` times the total load.
    pub(crate) fn two_lines_builder(
        line_a: &[(&str, f64)],
        line_b: &[(&str, f64)],
        anchor_scale: f64,
    ) -> NetworkBuilder {
        let mut builder = NetworkBuilder::new();
        for &(id, load) in line_a {
            builder.meter(id, line_a_voltage, move |k| load * line_a_load(k));
        }
        for &(id, load) in line_b {
            builder.meter(id, line_b_voltage, move |k| load * line_b_load(k));
        }

        let total_a: f64 = line_a.iter().map(|(_, load)| load).sum();
        let total_b: f64 = line_b.iter().map(|(_, load)| load).sum();
        builder.anchor(
            "substation",
            |k| 232.0 + common_voltage(k),
            move |k| anchor_scale * (total_a * line_a_load(k) + total_b * line_b_load(k)),
        );
        builder
    }
}

/// A builder for synthetic networks with one sample per 15 minutes over
/// four days.  Reactive power is 30% of active power.
pub(crate) struct NetworkBuilder {
    meters: Vec<(String, Vec<Sample>)>,
    anchors: Vec<(String, Vec<Sample>)>,
}

fn samples(voltage: impl Fn(usize) -> f64, power: impl Fn(usize) -> f64) -> Vec<Sample> {
    (0..SLOTS)
        .map(|k| Sample {
            timestamp: start() + TimeDelta::minutes(15 * k as i64),
            active_power: power(k),
            reactive_power: 0.3 * power(k),
            voltage: voltage(k),
        })
        .collect()
}

impl NetworkBuilder {
    pub(crate) fn new() -> Self {
        Self {
            meters: vec![],
            anchors: vec![],
        }
    }

    /// Adds a meter with the given voltage and active power profiles.
    pub(crate) fn meter(
        &mut self,
        id: &str,
        voltage: impl Fn(usize) -> f64,
        power: impl Fn(usize) -> f64,
    ) -> &mut Self {
        self.meters.push((id.to_string(), samples(voltage, power)));
        self
    }

    /// Adds an anchor with the given voltage and active power profiles.
    pub(crate) fn anchor(
        &mut self,
        id: &str,
        voltage: impl Fn(usize) -> f64,
        power: impl Fn(usize) -> f64,
    ) -> &mut Self {
        self.anchors.push((id.to_string(), samples(voltage, power)));
        self
    }

    /// Drops all but every `n`th sample of the given meter.
    pub(crate) fn keep_every(&mut self, id: &str, n: usize) -> &mut Self {
        for (_, samples) in self.meters.iter_mut().filter(|(m, _)| m == id) {
            *samples = samples.iter().step_by(n).copied().collect();
        }
        self
    }

    /// Adds zero-mean Gaussian noise to every voltage reading of every
    /// meter, with a standard deviation of `relative` times the reading.
    pub(crate) fn voltage_noise(&mut self, relative: f64, seed: u64) -> &mut Self {
        let mut rng = StdRng::seed_from_u64(seed);
        for (_, samples) in &mut self.meters {
            for sample in samples.iter_mut() {
                let Ok(normal) = Normal::new(0.0, relative * sample.voltage.abs()) else {
                    continue;
                };
                sample.voltage += normal.sample(&mut rng);
            }
        }
        self
    }

    pub(crate) fn build(&self) -> SyntheticNetwork {
        let to_meters = |series: &[(String, Vec<Sample>)]| {
            series
                .iter()
                .map(|(id, samples)| Meter::try_new(id.as_str(), samples.clone()).unwrap())
                .collect()
        };
        SyntheticNetwork {
            meters: to_meters(&self.meters),
            anchors: to_meters(&self.anchors),
        }
    }
}
