//! Distance/duration matrix value types.

use serde::{Deserialize, Serialize};

use crate::domain::Location;
use crate::error::{Error, Result};

/// Cell value for unreachable pairs.
pub const UNREACHABLE: f64 = f64::INFINITY;

/// Travel estimate between two locations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelTime {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

impl TravelTime {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds / 60.0
    }
}

/// Square N×N matrix of distances (meters) and durations (seconds) between a
/// set of locations; `distances[i][j]` is travel from `locations[i]` to
/// `locations[j]`. The diagonal is zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceMatrix {
    pub locations: Vec<Location>,
    pub distances_meters: Vec<Vec<f64>>,
    pub durations_seconds: Vec<Vec<f64>>,
    pub provider: String,
}

impl DistanceMatrix {
    pub fn new(
        locations: Vec<Location>,
        distances_meters: Vec<Vec<f64>>,
        durations_seconds: Vec<Vec<f64>>,
        provider: impl Into<String>,
    ) -> Result<Self> {
        let n = locations.len();
        if distances_meters.len() != n || durations_seconds.len() != n {
            return Err(Error::invalid(format!(
                "matrix has {} distance rows and {} duration rows for {n} locations",
                distances_meters.len(),
                durations_seconds.len()
            )));
        }
        for (i, row) in distances_meters.iter().enumerate() {
            if row.len() != n {
                return Err(Error::invalid(format!(
                    "distance matrix row {i} has {} columns, expected {n}",
                    row.len()
                )));
            }
        }
        for (i, row) in durations_seconds.iter().enumerate() {
            if row.len() != n {
                return Err(Error::invalid(format!(
                    "duration matrix row {i} has {} columns, expected {n}",
                    row.len()
                )));
            }
        }
        Ok(Self {
            locations,
            distances_meters,
            durations_seconds,
            provider: provider.into(),
        })
    }

    /// 1×1 zero matrix for a single location.
    pub fn single(location: Location, provider: impl Into<String>) -> Self {
        Self {
            locations: vec![location],
            distances_meters: vec![vec![0.0]],
            durations_seconds: vec![vec![0.0]],
            provider: provider.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn travel_time(&self, from: usize, to: usize) -> TravelTime {
        TravelTime {
            distance_meters: self.distances_meters[from][to],
            duration_seconds: self.durations_seconds[from][to],
        }
    }
}
