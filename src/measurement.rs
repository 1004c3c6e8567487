// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Raw measurements: the `Measurement` trait that foreign record types
//! implement, a concrete [`MeasurementRecord`], and per-meter [`Meter`]
//! series built from them.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

use crate::report::{DataQualityIssue, DataQualityWarning};
use crate::Error;

/**
This trait needs to be implemented by the type that represents one row of
telemetry.

Read more about why this is necessary [here][crate#the-measurement-trait].

<details>
<summary>Example implementation for a CSV row type:</summary>

```ignore
impl grid_topology_inference::Measurement for csv_rows::SmartMeterRow {
    fn meter_id(&self) -> &str {
        &self.meter_id
    }

    fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        self.timestamp
    }

    fn active_power(&self) -> f64 {
        self.p_kw
    }

    fn reactive_power(&self) -> f64 {
        self.q_kvar
    }

    fn voltage(&self) -> f64 {
        self.v
    }
}
```

</details>
*/
pub trait Measurement {
    /// Returns the id of the metering point.
    fn meter_id(&self) -> &str;
    /// Returns the instant the sample was taken.
    fn timestamp(&self) -> DateTime<Utc>;
    /// Returns the active power in kW.
    fn active_power(&self) -> f64;
    /// Returns the reactive power in kVAr.
    fn reactive_power(&self) -> f64;
    /// Returns the voltage in volts.
    fn voltage(&self) -> f64;
}

/// A single telemetry row.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRecord {
    pub meter_id: String,
    pub timestamp: DateTime<Utc>,
    pub active_power: f64,
    pub reactive_power: f64,
    pub voltage: f64,
}

impl MeasurementRecord {
    /// Creates a record from an ISO-8601 timestamp string.
    ///
    /// Timestamps without an offset are taken to be in UTC.
    pub fn try_new(
        timestamp: &str,
        meter_id: impl Into<String>,
        active_power: f64,
        reactive_power: f64,
        voltage: f64,
    ) -> Result<Self, Error> {
        let meter_id = meter_id.into();
        if meter_id.is_empty() {
            return Err(Error::invalid_input(format!(
                "Record at {timestamp} has an empty meter id."
            )));
        }
        Ok(Self {
            timestamp: parse_timestamp(timestamp)?,
            meter_id,
            active_power,
            reactive_power,
            voltage,
        })
    }
}

impl Measurement for MeasurementRecord {
    fn meter_id(&self) -> &str {
        &self.meter_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn active_power(&self) -> f64 {
        self.active_power
    }

    fn reactive_power(&self) -> f64 {
        self.reactive_power
    }

    fn voltage(&self) -> f64 {
        self.voltage
    }
}

fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(timestamp) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::invalid_input(format!("Can't parse timestamp: {timestamp}")))
}

/// One sample of a meter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub active_power: f64,
    pub reactive_power: f64,
    pub voltage: f64,
}

impl Sample {
    fn is_finite(&self) -> bool {
        self.active_power.is_finite() && self.reactive_power.is_finite() && self.voltage.is_finite()
    }
}

/// The time series of a single metering point.
///
/// Timestamps are strictly increasing.  The same type is used for anchors,
/// upstream aggregate measurements like a substation transformer, which are
/// not clustered themselves.
#[derive(Clone, Debug, PartialEq)]
pub struct Meter {
    id: String,
    samples: Vec<Sample>,
}

impl Meter {
    /// Creates a meter from samples in timestamp order.
    pub fn try_new(id: impl Into<String>, samples: Vec<Sample>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_input("Meter id can't be empty."));
        }
        if let Some(pair) = samples
            .windows(2)
            .find(|pair| pair[0].timestamp >= pair[1].timestamp)
        {
            return Err(Error::invalid_input(format!(
                "Meter {id}: timestamps must be strictly increasing. Found {} after {}.",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
        Ok(Self { id, samples })
    }

    /// Returns the id of the meter.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the samples of the meter, in timestamp order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the timestamps of the first and the last sample.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.samples.first()?.timestamp, self.samples.last()?.timestamp))
    }
}

/// Groups measurements into meters, sorted by meter id.
///
/// Samples are sorted by timestamp.  Duplicate timestamps (the first one is
/// kept) and non-finite samples are dropped and reported as warnings.
pub fn group_measurements<M: Measurement>(
    measurements: impl IntoIterator<Item = M>,
) -> Result<(Vec<Meter>, Vec<DataQualityWarning>), Error> {
    let mut grouped: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for measurement in measurements {
        let meter_id = measurement.meter_id();
        if meter_id.is_empty() {
            return Err(Error::invalid_input(format!(
                "Measurement at {} has an empty meter id.",
                measurement.timestamp()
            )));
        }
        grouped.entry(meter_id.to_string()).or_default().push(Sample {
            timestamp: measurement.timestamp(),
            active_power: measurement.active_power(),
            reactive_power: measurement.reactive_power(),
            voltage: measurement.voltage(),
        });
    }

    let mut warnings = vec![];
    let mut meters = Vec::with_capacity(grouped.len());
    for (meter_id, mut samples) in grouped {
        // Stable, so the first of several duplicates stays first.
        samples.sort_by_key(|s| s.timestamp);

        let mut kept: Vec<Sample> = Vec::with_capacity(samples.len());
        for sample in samples {
            if !sample.is_finite() {
                tracing::warn!(
                    "Dropping non-finite sample of meter {} at {}.",
                    meter_id,
                    sample.timestamp
                );
                warnings.push(DataQualityWarning::new(
                    &meter_id,
                    DataQualityIssue::NonFiniteSample {
                        timestamp: sample.timestamp,
                    },
                ));
                continue;
            }
            if kept.last().is_some_and(|last| last.timestamp == sample.timestamp) {
                tracing::warn!(
                    "Dropping duplicate sample of meter {} at {}.",
                    meter_id,
                    sample.timestamp
                );
                warnings.push(DataQualityWarning::new(
                    &meter_id,
                    DataQualityIssue::DuplicateTimestamp {
                        timestamp: sample.timestamp,
                    },
                ));
                continue;
            }
            kept.push(sample);
        }
        meters.push(Meter::try_new(meter_id, kept)?);
    }

    Ok((meters, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_parsing() -> Result<(), Error> {
        let record = MeasurementRecord::try_new("2024-03-01T10:15:00+01:00", "m1", 1.0, 0.5, 231.0)?;
        assert_eq!(
            record.timestamp,
            DateTime::parse_from_rfc3339("2024-03-01T09:15:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );

        let naive = MeasurementRecord::try_new("2024-03-01T09:15:00", "m1", 1.0, 0.5, 231.0)?;
        assert_eq!(naive.timestamp, record.timestamp);

        let spaced = MeasurementRecord::try_new("2024-03-01 09:15:00.000", "m1", 1.0, 0.5, 231.0)?;
        assert_eq!(spaced.timestamp, record.timestamp);

        assert!(
            MeasurementRecord::try_new("yesterday", "m1", 1.0, 0.5, 231.0)
                .is_err_and(|e| e == Error::invalid_input("Can't parse timestamp: yesterday"))
        );
        assert!(
            MeasurementRecord::try_new("2024-03-01T09:15:00Z", "", 1.0, 0.5, 231.0).is_err_and(
                |e| e == Error::invalid_input("Record at 2024-03-01T09:15:00Z has an empty meter id.")
            )
        );

        Ok(())
    }

    #[test]
    fn test_meter_validation() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let sample = |offset: i64| Sample {
            timestamp: ts + chrono::TimeDelta::seconds(offset),
            active_power: 1.0,
            reactive_power: 0.0,
            voltage: 230.0,
        };

        assert!(Meter::try_new("m1", vec![sample(0), sample(60)]).is_ok());
        assert!(Meter::try_new("", vec![sample(0)])
            .is_err_and(|e| e == Error::invalid_input("Meter id can't be empty.")));
        assert!(Meter::try_new("m1", vec![sample(60), sample(60)]).is_err());
        assert!(Meter::try_new("m1", vec![sample(60), sample(0)]).is_err());

        let meter = Meter::try_new("m1", vec![sample(0), sample(60)]).unwrap();
        assert_eq!(meter.span(), Some((sample(0).timestamp, sample(60).timestamp)));
        assert_eq!(Meter::try_new("m2", vec![]).unwrap().span(), None);
    }

    #[test]
    fn test_grouping() -> Result<(), Error> {
        let records = vec![
            MeasurementRecord::try_new("2024-03-01T00:15:00Z", "b", 2.0, 0.0, 230.0)?,
            MeasurementRecord::try_new("2024-03-01T00:00:00Z", "b", 1.0, 0.0, 230.0)?,
            MeasurementRecord::try_new("2024-03-01T00:00:00Z", "a", 3.0, 0.0, 230.0)?,
            MeasurementRecord::try_new("2024-03-01T00:00:00Z", "a", 4.0, 0.0, 229.0)?,
            MeasurementRecord::try_new("2024-03-01T00:15:00Z", "a", f64::NAN, 0.0, 229.0)?,
        ];

        let (meters, warnings) = group_measurements(records)?;
        assert_eq!(
            meters.iter().map(|m| m.id()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(meters[0].samples().len(), 1);
        assert_eq!(meters[0].samples()[0].active_power, 3.0);
        assert_eq!(
            meters[1]
                .samples()
                .iter()
                .map(|s| s.active_power)
                .collect::<Vec<_>>(),
            vec![1.0, 2.0]
        );

        assert_eq!(warnings.len(), 2);
        assert!(matches!(
            warnings[0].issue,
            DataQualityIssue::DuplicateTimestamp { .. }
        ));
        assert!(matches!(
            warnings[1].issue,
            DataQualityIssue::NonFiniteSample { .. }
        ));
        assert!(warnings.iter().all(|w| w.meter_id == "a" && !w.excludes_meter()));

        Ok(())
    }
}
