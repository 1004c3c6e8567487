// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Profiles aligned onto a common time grid, and the series arithmetic used
//! by the later stages.

use chrono::{DateTime, TimeDelta, Utc};

/// The shared time grid of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeGrid {
    start: DateTime<Utc>,
    interval: TimeDelta,
    len: usize,
    end: DateTime<Utc>,
}

impl TimeGrid {
    /// Creates a grid of `len` slots, or `None` if it is empty or its last
    /// slot can't be represented.
    pub(crate) fn try_new(start: DateTime<Utc>, interval: TimeDelta, len: usize) -> Option<Self> {
        let mut grid = Self {
            start,
            interval,
            len,
            end: start,
        };
        grid.end = grid.timestamp(len.checked_sub(1)?)?;
        Some(grid)
    }

    /// Returns the timestamp of the first slot.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the timestamp of the last slot.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the distance between two slots.
    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the grid has no slots.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the timestamp of the slot at `index`, or `None` if it is out
    /// of the range of representable timestamps.
    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        let offset = i64::try_from(index)
            .ok()?
            .checked_mul(self.interval.num_milliseconds())?;
        self.start
            .checked_add_signed(TimeDelta::try_milliseconds(offset)?)
    }
}

/// P, Q and V at one grid slot.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GridSample {
    pub active_power: f64,
    pub reactive_power: f64,
    pub voltage: f64,
}

/// One of the measured quantities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    ActivePower,
    ReactivePower,
    Voltage,
}

impl GridSample {
    /// Returns the value of the given channel.
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::ActivePower => self.active_power,
            Channel::ReactivePower => self.reactive_power,
            Channel::Voltage => self.voltage,
        }
    }
}

/// A grid-aligned series.  `None` marks a missing slot.
pub type Series = Vec<Option<GridSample>>;

/// A meter's measurements resampled onto the run's [`TimeGrid`].
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedProfile {
    meter_id: String,
    samples: Series,
}

impl AlignedProfile {
    pub(crate) fn new(meter_id: impl Into<String>, samples: Series) -> Self {
        Self {
            meter_id: meter_id.into(),
            samples,
        }
    }

    /// Returns the id of the meter the profile belongs to.
    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    /// Returns the grid-aligned samples.
    pub fn samples(&self) -> &[Option<GridSample>] {
        &self.samples
    }

    /// Returns the number of grid slots.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the profile has no grid slots.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the fraction of grid slots that have no sample.
    pub fn missing_fraction(&self) -> f64 {
        missing_fraction(&self.samples)
    }
}

pub(crate) fn missing_fraction(series: &[Option<GridSample>]) -> f64 {
    if series.is_empty() {
        return 1.0;
    }
    series.iter().filter(|s| s.is_none()).count() as f64 / series.len() as f64
}

/// Returns the values of `channel` at the slots where both series have a
/// sample.
pub(crate) fn paired_values(
    a: &[Option<GridSample>],
    b: &[Option<GridSample>],
    channel: Channel,
) -> (Vec<f64>, Vec<f64>) {
    a.iter()
        .zip(b)
        .filter_map(|pair| match pair {
            (Some(x), Some(y)) => Some((x.get(channel), y.get(channel))),
            _ => None,
        })
        .unzip()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Standardizes `values` to zero mean and unit variance.
///
/// Returns `None` if the values are (numerically) constant.
pub(crate) fn z_scores(values: &[f64]) -> Option<Vec<f64>> {
    let mean = mean(values)?;
    let std_dev = std_dev(values)?;
    if std_dev <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / std_dev).collect())
}

/// Pearson correlation, computed as the mean product of z-scores.
pub(crate) fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let za = z_scores(a)?;
    let zb = z_scores(b)?;
    let r = za.iter().zip(&zb).map(|(x, y)| x * y).sum::<f64>() / za.len() as f64;
    Some(r.clamp(-1.0, 1.0))
}

/// Sums P and Q and averages V over `parts`, slot by slot.
///
/// A slot is missing in the result if it is missing in any of the parts.
pub(crate) fn aggregate(parts: &[&[Option<GridSample>]]) -> Series {
    let Some(len) = parts.iter().map(|p| p.len()).min() else {
        return vec![];
    };
    (0..len)
        .map(|slot| {
            let mut sum = GridSample::default();
            for part in parts {
                let sample = part[slot]?;
                sum.active_power += sample.active_power;
                sum.reactive_power += sample.reactive_power;
                sum.voltage += sample.voltage;
            }
            sum.voltage /= parts.len() as f64;
            Some(sum)
        })
        .collect()
}

/// Relative mismatch between `reference` and the sum of `parts`.
///
/// For each of P and Q this is `Σ|ref - Σparts| / Σ|ref|` over the slots where
/// everything is present.  The larger of the two is returned; a channel whose
/// reference is zero throughout is skipped.  Returns `None` if nothing could
/// be compared.
pub(crate) fn balance_residual(
    reference: &[Option<GridSample>],
    parts: &[&[Option<GridSample>]],
) -> Option<f64> {
    let downstream = aggregate(parts);
    let mut result: Option<f64> = None;
    for channel in [Channel::ActivePower, Channel::ReactivePower] {
        let (expected, actual) = paired_values(reference, &downstream, channel);
        let scale: f64 = expected.iter().map(|v| v.abs()).sum();
        if scale <= f64::EPSILON {
            continue;
        }
        let mismatch: f64 = expected
            .iter()
            .zip(&actual)
            .map(|(e, a)| (e - a).abs())
            .sum();
        let residual = mismatch / scale;
        result = Some(result.map_or(residual, |r| r.max(residual)));
    }
    result
}

/// Fraction of shared slots where `a`'s active power is at least `b`'s.
pub(crate) fn dominance(a: &[Option<GridSample>], b: &[Option<GridSample>]) -> Option<f64> {
    let (pa, pb) = paired_values(a, b, Channel::ActivePower);
    if pa.is_empty() {
        return None;
    }
    let count = pa.iter().zip(&pb).filter(|(x, y)| x >= y).count();
    Some(count as f64 / pa.len() as f64)
}
