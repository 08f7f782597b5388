//! OSRM provider backed by the `/table` service of a local or public
//! routing engine. Null cells (unreachable pairs) become infinity.

use std::time::Duration;

use serde::Deserialize;

use crate::distance::matrix::{DistanceMatrix, UNREACHABLE};
use crate::distance::providers::DistanceProvider;
use crate::domain::Location;
use crate::error::{Error, Result};

const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OsrmProvider {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TableResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    distances: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    durations: Vec<Vec<Option<f64>>>,
}

impl OsrmProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TRANSPORT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl DistanceProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "osrm"
    }

    async fn calculate_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix> {
        if locations.is_empty() {
            return Err(Error::invalid("locations list cannot be empty"));
        }
        if locations.len() == 1 {
            return Ok(DistanceMatrix::single(locations[0], self.name()));
        }

        // OSRM wants longitude,latitude pairs.
        let coords = locations
            .iter()
            .map(|l| format!("{},{}", l.longitude, l.latitude))
            .collect::<Vec<_>>()
            .join(";");
        let url = format!("{}/table/v1/driving/{coords}", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("annotations", "distance,duration")])
            .send()
            .await
            .map_err(|e| Error::Internal(format!("OSRM request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "OSRM API returned status {}",
                response.status()
            )));
        }

        let data: TableResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("OSRM response unparseable: {e}")))?;

        if data.code != "Ok" {
            let message = data.message.unwrap_or(data.code);
            return Err(Error::Internal(format!("OSRM API error: {message}")));
        }

        if data.distances.len() != locations.len() || data.durations.len() != locations.len() {
            return Err(Error::Internal(format!(
                "expected {} rows, got {} distances / {} durations",
                locations.len(),
                data.distances.len(),
                data.durations.len()
            )));
        }

        let fill = |rows: Vec<Vec<Option<f64>>>| -> Vec<Vec<f64>> {
            rows.into_iter()
                .map(|row| row.into_iter().map(|c| c.unwrap_or(UNREACHABLE)).collect())
                .collect()
        };

        DistanceMatrix::new(
            locations.to_vec(),
            fill(data.distances),
            fill(data.durations),
            self.name(),
        )
    }
}
