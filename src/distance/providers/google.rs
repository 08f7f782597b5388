//! Google Maps Distance Matrix provider, with an optional traffic-aware
//! variant that prefers `duration_in_traffic` for a given departure instant.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::distance::matrix::{DistanceMatrix, UNREACHABLE};
use crate::distance::providers::DistanceProvider;
use crate::domain::Location;
use crate::error::{Error, Result};

const BASE_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GoogleMapsProvider {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MatrixResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<ValueField>,
    duration: Option<ValueField>,
    duration_in_traffic: Option<ValueField>,
}

#[derive(Deserialize)]
struct ValueField {
    value: f64,
}

impl GoogleMapsProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::invalid("Google Maps API key not provided"));
        }
        let client = reqwest::Client::builder()
            .timeout(TRANSPORT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { api_key, client })
    }

    /// Traffic-aware matrix for a departure instant (Unix seconds); durations
    /// prefer `duration_in_traffic` when the API returns it.
    pub async fn calculate_with_traffic(
        &self,
        locations: &[Location],
        departure_time: Option<i64>,
    ) -> Result<DistanceMatrix> {
        self.request(locations, departure_time, "google_maps_traffic")
            .await
    }

    async fn request(
        &self,
        locations: &[Location],
        departure_time: Option<i64>,
        provider_label: &str,
    ) -> Result<DistanceMatrix> {
        if locations.is_empty() {
            return Err(Error::invalid("locations list cannot be empty"));
        }
        if locations.len() == 1 {
            return Ok(DistanceMatrix::single(locations[0], provider_label));
        }

        let location_str = locations
            .iter()
            .map(|l| format!("{},{}", l.latitude, l.longitude))
            .collect::<Vec<_>>()
            .join("|");

        let mut params = vec![
            ("origins", location_str.clone()),
            ("destinations", location_str),
            ("mode", "driving".to_string()),
            ("units", "metric".to_string()),
            ("key", self.api_key.clone()),
        ];
        if let Some(departure) = departure_time {
            params.push(("departure_time", departure.to_string()));
            params.push(("traffic_model", "best_guess".to_string()));
        }

        let response = self
            .client
            .get(BASE_URL)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Google Maps request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "Google Maps API returned status {}",
                response.status()
            )));
        }

        let data: MatrixResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Google Maps response unparseable: {e}")))?;

        if data.status != "OK" {
            let message = data.error_message.unwrap_or(data.status);
            return Err(Error::Internal(format!("Google Maps API error: {message}")));
        }

        if data.rows.len() != locations.len() {
            return Err(Error::Internal(format!(
                "expected {} rows, got {}",
                locations.len(),
                data.rows.len()
            )));
        }

        let mut distances = Vec::with_capacity(locations.len());
        let mut durations = Vec::with_capacity(locations.len());

        for (i, row) in data.rows.iter().enumerate() {
            if row.elements.len() != locations.len() {
                return Err(Error::Internal(format!(
                    "expected {} elements in row {i}, got {}",
                    locations.len(),
                    row.elements.len()
                )));
            }

            let mut dist_row = Vec::with_capacity(locations.len());
            let mut dur_row = Vec::with_capacity(locations.len());

            for (j, element) in row.elements.iter().enumerate() {
                match element.status.as_str() {
                    "ZERO_RESULTS" if i == j => {
                        dist_row.push(0.0);
                        dur_row.push(0.0);
                    }
                    "OK" => {
                        dist_row.push(element.distance.as_ref().map_or(0.0, |d| d.value));
                        let duration = element
                            .duration_in_traffic
                            .as_ref()
                            .or(element.duration.as_ref())
                            .map_or(0.0, |d| d.value);
                        dur_row.push(duration);
                    }
                    status => {
                        debug!(row = i, col = j, status, "unreachable matrix cell");
                        dist_row.push(UNREACHABLE);
                        dur_row.push(UNREACHABLE);
                    }
                }
            }

            distances.push(dist_row);
            durations.push(dur_row);
        }

        DistanceMatrix::new(locations.to_vec(), distances, durations, provider_label)
    }
}

impl DistanceProvider for GoogleMapsProvider {
    fn name(&self) -> &'static str {
        "google_maps"
    }

    async fn calculate_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix> {
        self.request(locations, None, "google_maps").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(GoogleMapsProvider::new("").is_err());
        assert!(GoogleMapsProvider::new("key").is_ok());
    }

    #[tokio::test]
    async fn single_location_short_circuits_without_network() {
        let provider = GoogleMapsProvider::new("key").unwrap();
        let m = provider
            .calculate_matrix(&[Location::new(-33.45, -70.66).unwrap()])
            .await
            .unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.distances_meters[0][0], 0.0);
    }
}
