//! Geodesic fallback provider: haversine distance, duration from a configured
//! average speed. Never fails for valid coordinates, which is what makes it
//! the terminal link in the provider chain.

use rayon::prelude::*;

use crate::distance::matrix::DistanceMatrix;
use crate::distance::providers::DistanceProvider;
use crate::domain::Location;
use crate::error::{Error, Result};
use crate::geo;

pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 40.0;

pub struct GeodesicProvider {
    average_speed_mps: f64,
}

impl GeodesicProvider {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self {
            average_speed_mps: average_speed_kmh * 1000.0 / 3600.0,
        }
    }
}

impl Default for GeodesicProvider {
    fn default() -> Self {
        Self::new(DEFAULT_AVERAGE_SPEED_KMH)
    }
}

impl DistanceProvider for GeodesicProvider {
    fn name(&self) -> &'static str {
        "geodesic"
    }

    async fn calculate_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix> {
        if locations.is_empty() {
            return Err(Error::invalid("locations list cannot be empty"));
        }
        if locations.len() == 1 {
            return Ok(DistanceMatrix::single(locations[0], self.name()));
        }

        // O(N²) haversine fill; rows are independent.
        let distances: Vec<Vec<f64>> = locations
            .par_iter()
            .map(|&from| {
                locations
                    .iter()
                    .map(|&to| geo::haversine(from, to))
                    .collect()
            })
            .collect();

        let durations: Vec<Vec<f64>> = distances
            .iter()
            .map(|row| row.iter().map(|d| d / self.average_speed_mps).collect())
            .collect();

        DistanceMatrix::new(locations.to_vec(), distances, durations, self.name())
    }
}
