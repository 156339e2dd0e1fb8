//! Typed records and table loading for the ozone monitoring data.
//!
//! Raw rows come in as [StationDay] / [GridDay] records (named fields only,
//! never positional columns). Loading derives the shared dense time index
//! from the sorted distinct dates, checks that every station keeps a fixed
//! coordinate pair, and applies the configured response transform.

use crate::errors::{EvalError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Covariates carried by every record, in fixed order
pub const COVARIATE_NAMES: [&str; 3] = ["tmax", "wdsp", "rh"];

/// Calendar date as a lexicographically ordered key
pub type DateKey = (i32, u32, u32);

/// One monitoring-station day as read from the input table
#[derive(Debug, Clone, Deserialize)]
pub struct StationDay {
    pub station: String,
    pub lon: f64,
    pub lat: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Daily maximum 8-hour ozone; empty field marks a missing value
    pub y8hrmax: Option<f64>,
    pub tmax: f64,
    pub wdsp: f64,
    pub rh: f64,
}

/// One prediction-grid point day, same shape as [StationDay] minus the
/// response
#[derive(Debug, Clone, Deserialize)]
pub struct GridDay {
    pub lon: f64,
    pub lat: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub tmax: f64,
    pub wdsp: f64,
    pub rh: f64,
}

/// Transform applied to the response before modeling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseTransform {
    #[default]
    Sqrt,
    Log,
}

impl ResponseTransform {
    /// Transform a raw response value
    pub fn apply(&self, y: f64) -> Result<f64> {
        match self {
            ResponseTransform::Sqrt => {
                if y < 0. {
                    Err(EvalError::InvalidValue(format!(
                        "sqrt transform needs a non-negative response, got {y}"
                    )))
                } else {
                    Ok(y.sqrt())
                }
            }
            ResponseTransform::Log => {
                if y <= 0. {
                    Err(EvalError::InvalidValue(format!(
                        "log transform needs a positive response, got {y}"
                    )))
                } else {
                    Ok(y.ln())
                }
            }
        }
    }
}

impl fmt::Display for ResponseTransform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseTransform::Sqrt => write!(f, "sqrt"),
            ResponseTransform::Log => write!(f, "log"),
        }
    }
}

/// One observation after derivation: fixed station coordinates, dense time
/// index and transformed response
#[derive(Debug, Clone)]
pub struct Observation {
    pub station: String,
    pub lon: f64,
    pub lat: f64,
    /// Dense time index in 1..=n_time, shared across stations
    pub time_index: usize,
    /// Transformed response; `None` marks a missing value
    pub response: Option<f64>,
    /// Covariate values ordered like [COVARIATE_NAMES]
    pub covariates: [f64; 3],
}

/// One grid point after derivation
#[derive(Debug, Clone)]
pub struct GridPoint {
    pub lon: f64,
    pub lat: f64,
    pub time_index: usize,
    pub covariates: [f64; 3],
}

fn time_index_of(dates: &[DateKey], key: DateKey) -> usize {
    // Dates are sorted and distinct; derivation guarantees membership
    dates.partition_point(|&d| d < key) + 1
}

fn derive_dates<I: Iterator<Item = DateKey>>(keys: I) -> Vec<DateKey> {
    let set: BTreeSet<DateKey> = keys.collect();
    set.into_iter().collect()
}

/// The loaded observation table
#[derive(Debug, Clone)]
pub struct OzoneTable {
    observations: Vec<Observation>,
    /// Station identifiers in first-appearance order
    stations: Vec<String>,
    /// Sorted distinct dates backing the time index
    dates: Vec<DateKey>,
    transform: ResponseTransform,
}

impl OzoneTable {
    /// Build the table from raw records, deriving the time index, checking
    /// station coordinates and transforming the response. `n_time` truncates
    /// to the first time points when given.
    pub fn from_records(
        records: Vec<StationDay>,
        transform: ResponseTransform,
        n_time: Option<usize>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(EvalError::InvalidValue(
                "observation table is empty".to_string(),
            ));
        }
        let mut dates = derive_dates(records.iter().map(|r| (r.year, r.month, r.day)));
        if let Some(n) = n_time {
            if n == 0 {
                return Err(EvalError::InvalidValue(
                    "n_time should be at least 1".to_string(),
                ));
            }
            dates.truncate(n);
        }

        let mut stations: Vec<String> = Vec::new();
        let mut coords: HashMap<String, (f64, f64)> = HashMap::new();
        let mut observations = Vec::with_capacity(records.len());
        for r in &records {
            match coords.get(&r.station) {
                None => {
                    coords.insert(r.station.clone(), (r.lon, r.lat));
                    stations.push(r.station.clone());
                }
                Some(&(lon, lat)) => {
                    if lon != r.lon || lat != r.lat {
                        return Err(EvalError::InvalidValue(format!(
                            "station {} moves from ({lon}, {lat}) to ({}, {}); \
                             coordinates must be time-invariant",
                            r.station, r.lon, r.lat
                        )));
                    }
                }
            }
            let key = (r.year, r.month, r.day);
            if dates.binary_search(&key).is_err() {
                // Truncated away by n_time
                continue;
            }
            let response = match r.y8hrmax {
                Some(y) => Some(transform.apply(y)?),
                None => None,
            };
            observations.push(Observation {
                station: r.station.clone(),
                lon: r.lon,
                lat: r.lat,
                time_index: time_index_of(&dates, key),
                response,
                covariates: [r.tmax, r.wdsp, r.rh],
            });
        }
        debug!(
            "observation table: {} rows, {} stations, {} time points",
            observations.len(),
            stations.len(),
            dates.len()
        );
        Ok(OzoneTable {
            observations,
            stations,
            dates,
            transform,
        })
    }

    /// Read the table from CSV
    pub fn from_reader<R: Read>(
        reader: R,
        transform: ResponseTransform,
        n_time: Option<usize>,
    ) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let records = csv
            .deserialize()
            .collect::<std::result::Result<Vec<StationDay>, _>>()?;
        Self::from_records(records, transform, n_time)
    }

    /// Read the table from a CSV file
    pub fn from_csv_path<P: AsRef<Path>>(
        path: P,
        transform: ResponseTransform,
        n_time: Option<usize>,
    ) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, transform, n_time)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn n_stations(&self) -> usize {
        self.stations.len()
    }

    /// Number of time points, the T of the dense 1..=T index
    pub fn n_time(&self) -> usize {
        self.dates.len()
    }

    pub fn dates(&self) -> &[DateKey] {
        &self.dates
    }

    pub fn transform(&self) -> ResponseTransform {
        self.transform
    }
}

/// The loaded prediction-grid table
#[derive(Debug, Clone)]
pub struct GridTable {
    points: Vec<GridPoint>,
    dates: Vec<DateKey>,
}

impl GridTable {
    pub fn from_records(records: Vec<GridDay>, n_time: Option<usize>) -> Result<Self> {
        if records.is_empty() {
            return Err(EvalError::InvalidValue("grid table is empty".to_string()));
        }
        let mut dates = derive_dates(records.iter().map(|r| (r.year, r.month, r.day)));
        if let Some(n) = n_time {
            dates.truncate(n);
        }
        let points = records
            .iter()
            .filter(|r| dates.binary_search(&(r.year, r.month, r.day)).is_ok())
            .map(|r| GridPoint {
                lon: r.lon,
                lat: r.lat,
                time_index: time_index_of(&dates, (r.year, r.month, r.day)),
                covariates: [r.tmax, r.wdsp, r.rh],
            })
            .collect();
        Ok(GridTable { points, dates })
    }

    pub fn from_reader<R: Read>(reader: R, n_time: Option<usize>) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let records = csv
            .deserialize()
            .collect::<std::result::Result<Vec<GridDay>, _>>()?;
        Self::from_records(records, n_time)
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P, n_time: Option<usize>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, n_time)
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn n_time(&self) -> usize {
        self.dates.len()
    }

    /// Grid points of one time slice
    pub fn slice(&self, time_index: usize) -> Vec<&GridPoint> {
        self.points
            .iter()
            .filter(|p| p.time_index == time_index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<StationDay> {
        let mut out = Vec::new();
        for (station, lon, lat) in [("A", -78.0, 42.0), ("B", -76.0, 43.0)] {
            for day in [3u32, 1, 2] {
                out.push(StationDay {
                    station: station.to_string(),
                    lon,
                    lat,
                    year: 1995,
                    month: 7,
                    day,
                    y8hrmax: if day == 2 { None } else { Some(40. + day as f64) },
                    tmax: 85.,
                    wdsp: 4.,
                    rh: 0.6,
                });
            }
        }
        out
    }

    #[test]
    fn test_time_index_is_dense_and_shared() {
        let table = OzoneTable::from_records(records(), ResponseTransform::Sqrt, None).unwrap();
        assert_eq!(table.n_time(), 3);
        // Rows arrive day 3, 1, 2 but indices follow sorted dates
        let idx: Vec<usize> = table
            .observations()
            .iter()
            .map(|o| o.time_index)
            .collect();
        assert_eq!(idx, vec![3, 1, 2, 3, 1, 2]);
        assert_eq!(table.stations(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_sqrt_transform_applied() {
        let table = OzoneTable::from_records(records(), ResponseTransform::Sqrt, None).unwrap();
        let first = &table.observations()[0];
        assert_eq!(first.response, Some(43f64.sqrt()));
        // Missing responses stay missing
        assert!(table.observations()[2].response.is_none());
    }

    #[test]
    fn test_moving_station_is_rejected() {
        let mut recs = records();
        recs[1].lon += 0.5;
        let err = OzoneTable::from_records(recs, ResponseTransform::Sqrt, None).unwrap_err();
        assert!(matches!(err, EvalError::InvalidValue(_)));
    }

    #[test]
    fn test_n_time_truncates() {
        let table =
            OzoneTable::from_records(records(), ResponseTransform::Sqrt, Some(2)).unwrap();
        assert_eq!(table.n_time(), 2);
        assert_eq!(table.observations().len(), 4);
        assert!(table.observations().iter().all(|o| o.time_index <= 2));
    }

    #[test]
    fn test_negative_response_under_sqrt_is_rejected() {
        let mut recs = records();
        recs[0].y8hrmax = Some(-1.);
        let err = OzoneTable::from_records(recs, ResponseTransform::Sqrt, None).unwrap_err();
        assert!(matches!(err, EvalError::InvalidValue(_)));
    }

    #[test]
    fn test_csv_roundtrip() {
        let csv = "\
station,lon,lat,year,month,day,y8hrmax,tmax,wdsp,rh
A,-78.0,42.0,1995,7,1,41.2,85,4,0.6
A,-78.0,42.0,1995,7,2,,86,5,0.5
B,-76.0,43.0,1995,7,1,39.0,84,3,0.7
B,-76.0,43.0,1995,7,2,44.1,88,6,0.4
";
        let table =
            OzoneTable::from_reader(csv.as_bytes(), ResponseTransform::Sqrt, None).unwrap();
        assert_eq!(table.observations().len(), 4);
        assert_eq!(table.n_time(), 2);
        assert!(table.observations()[1].response.is_none());
    }

    #[test]
    fn test_grid_slice() {
        let recs = vec![
            GridDay {
                lon: -78.,
                lat: 42.,
                year: 1995,
                month: 7,
                day: 1,
                tmax: 85.,
                wdsp: 4.,
                rh: 0.6,
            },
            GridDay {
                lon: -78.,
                lat: 42.,
                year: 1995,
                month: 7,
                day: 2,
                tmax: 86.,
                wdsp: 5.,
                rh: 0.5,
            },
            GridDay {
                lon: -77.,
                lat: 42.5,
                year: 1995,
                month: 7,
                day: 2,
                tmax: 86.,
                wdsp: 5.,
                rh: 0.5,
            },
        ];
        let grid = GridTable::from_records(recs, None).unwrap();
        assert_eq!(grid.n_time(), 2);
        assert_eq!(grid.slice(2).len(), 2);
        assert_eq!(grid.slice(1).len(), 1);
    }
}
