// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Alignment of raw meter series onto a common time grid.

use chrono::{DateTime, TimeDelta, Utc};

use crate::profile::{AlignedProfile, GridSample, Series, TimeGrid};
use crate::report::{DataQualityIssue, DataQualityWarning};
use crate::{Error, Meter, TopologyConfig};

/// The output of the normalizer.
#[derive(Clone, Debug)]
pub struct AlignedProfiles {
    pub grid: TimeGrid,
    /// Usable meters, sorted by meter id.
    pub profiles: Vec<AlignedProfile>,
    /// Usable anchors, sorted by anchor id.
    pub anchors: Vec<AlignedProfile>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Resamples `meters` and `anchors` onto a common grid.
///
/// Meters with too few samples or too many gaps are left out and reported as
/// warnings.  Returns an error if the window contains no samples at all.
pub fn align(
    meters: &[Meter],
    anchors: &[Meter],
    config: &TopologyConfig,
) -> Result<AlignedProfiles, Error> {
    let grid = build_grid(meters, config)?;
    tracing::debug!(
        "Aligning {} meters and {} anchors onto {} slots of {} from {}.",
        meters.len(),
        anchors.len(),
        grid.len(),
        grid.interval(),
        grid.start()
    );

    let mut warnings = vec![];
    let profiles = align_all(meters, &grid, config, &mut warnings);
    let anchors = align_all(anchors, &grid, config, &mut warnings);

    Ok(AlignedProfiles {
        grid,
        profiles,
        anchors,
        warnings,
    })
}

fn align_all(
    meters: &[Meter],
    grid: &TimeGrid,
    config: &TopologyConfig,
    warnings: &mut Vec<DataQualityWarning>,
) -> Vec<AlignedProfile> {
    let mut profiles = vec![];
    for meter in meters {
        match align_meter(meter, grid, config) {
            Ok(profile) => profiles.push(profile),
            Err(issue) => {
                let warning = DataQualityWarning::new(meter.id(), issue);
                tracing::warn!("Excluding meter {}", warning);
                warnings.push(warning);
            }
        }
    }
    profiles.sort_by(|a, b| a.meter_id().cmp(b.meter_id()));
    profiles
}

fn build_grid(meters: &[Meter], config: &TopologyConfig) -> Result<TimeGrid, Error> {
    let (start, end) = match &config.window {
        Some(window) => (window.start, window.end),
        None => {
            let spans = meters.iter().filter_map(|m| m.span());
            let start = spans.clone().map(|(s, _)| s).min();
            let end = spans.map(|(_, e)| e).max();
            match (start, end) {
                (Some(start), Some(end)) => (start, end),
                _ => return Err(Error::insufficient_input("No samples to align.")),
            }
        }
    };

    let in_window = meters
        .iter()
        .flat_map(|m| m.samples())
        .any(|s| s.timestamp >= start && s.timestamp <= end);
    if !in_window {
        return Err(Error::insufficient_input(format!(
            "The window {start} - {end} contains no samples."
        )));
    }

    let interval = config.resample_interval.num_milliseconds();
    if interval <= 0 {
        return Err(Error::configuration(format!(
            "resample_interval must be at least one millisecond, got {}.",
            config.resample_interval
        )));
    }
    let slots = (end - start).num_milliseconds() / interval;
    usize::try_from(slots)
        .ok()
        .and_then(|s| s.checked_add(1))
        .and_then(|len| TimeGrid::try_new(start, config.resample_interval, len))
        .ok_or_else(|| Error::internal(format!("Invalid grid between {start} and {end}.")))
}

fn align_meter(
    meter: &Meter,
    grid: &TimeGrid,
    config: &TopologyConfig,
) -> Result<AlignedProfile, DataQualityIssue> {
    let count = meter
        .samples()
        .iter()
        .filter(|s| s.timestamp >= grid.start() && s.timestamp <= grid.end())
        .count();
    if count < config.min_samples {
        return Err(DataQualityIssue::TooFewSamples { count });
    }

    let series: Series = (0..grid.len())
        .map(|slot| {
            grid.timestamp(slot)
                .and_then(|at| interpolate(meter, at, config.max_interpolation_gap))
        })
        .collect();

    let profile = AlignedProfile::new(meter.id(), series);
    let missing_fraction = profile.missing_fraction();
    if missing_fraction > config.gap_tolerance {
        return Err(DataQualityIssue::ExcessiveGaps { missing_fraction });
    }

    Ok(profile)
}

/// Linear interpolation of the meter's samples at `at`.
///
/// Returns `None` outside the meter's span, or when the bracketing samples
/// are more than `max_gap` apart.
fn interpolate(meter: &Meter, at: DateTime<Utc>, max_gap: TimeDelta) -> Option<GridSample> {
    let samples = meter.samples();
    let idx = samples.partition_point(|s| s.timestamp < at);

    let next = samples.get(idx)?;
    if next.timestamp == at {
        return Some(GridSample {
            active_power: next.active_power,
            reactive_power: next.reactive_power,
            voltage: next.voltage,
        });
    }
    let prev = samples.get(idx.checked_sub(1)?)?;

    let gap = next.timestamp - prev.timestamp;
    if gap > max_gap {
        return None;
    }

    let weight = (at - prev.timestamp).num_milliseconds() as f64 / gap.num_milliseconds() as f64;
    let lerp = |a: f64, b: f64| a + (b - a) * weight;
    Some(GridSample {
        active_power: lerp(prev.active_power, next.active_power),
        reactive_power: lerp(prev.reactive_power, next.reactive_power),
        voltage: lerp(prev.voltage, next.voltage),
    })
}
