//! Distance and travel-time calculation.
//!
//! [`DistanceService`] orchestrates an ordered provider chain (external
//! routing API → local routing engine → geodesic fallback) with cache lookup
//! in front and write-through behind. The geodesic provider always succeeds
//! for valid coordinates, so an exhausted chain implies a bug.

pub mod cache;
pub mod matrix;
pub mod providers;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::domain::Location;
use crate::error::{Error, Result};
use crate::store::Store;

use cache::{CacheStatistics, MatrixCache};
use matrix::{DistanceMatrix, TravelTime};
use providers::{GeodesicProvider, GoogleMapsProvider, OsrmProvider, Provider};

pub struct DistanceService {
    providers: Vec<Provider>,
    cache: Option<MatrixCache>,
}

impl DistanceService {
    /// Builds the provider chain from configuration. Google Maps joins only
    /// with an API key, OSRM only with a base URL; the geodesic fallback is
    /// always last.
    pub fn new(config: &Config, store: Arc<Store>) -> Self {
        let mut providers = Vec::new();

        if let Some(key) = &config.google_maps_api_key {
            match GoogleMapsProvider::new(key.clone()) {
                Ok(p) => {
                    info!("Google Maps provider initialized");
                    providers.push(Provider::GoogleMaps(p));
                }
                Err(e) => warn!("failed to initialize Google Maps provider: {e}"),
            }
        }

        if let Some(url) = &config.osrm_base_url {
            match OsrmProvider::new(url.clone()) {
                Ok(p) => {
                    info!("OSRM provider initialized");
                    providers.push(Provider::Osrm(p));
                }
                Err(e) => warn!("failed to initialize OSRM provider: {e}"),
            }
        }

        providers.push(Provider::Geodesic(GeodesicProvider::default()));

        Self {
            providers,
            cache: Some(MatrixCache::new(store)),
        }
    }

    /// Geodesic-only service without caching, for tests.
    pub fn geodesic_only() -> Self {
        Self {
            providers: vec![Provider::Geodesic(GeodesicProvider::default())],
            cache: None,
        }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Whether the head of the chain produces traffic-aware durations.
    pub fn traffic_capable(&self) -> bool {
        self.providers.first().is_some_and(|p| p.traffic_capable())
    }

    pub async fn calculate_matrix(
        &self,
        locations: &[Location],
        force_provider: Option<&str>,
        skip_cache: bool,
    ) -> Result<DistanceMatrix> {
        if locations.is_empty() {
            return Err(Error::invalid("locations list cannot be empty"));
        }

        if !skip_cache {
            if let Some(cache) = &self.cache {
                if let Some(matrix) = cache.get(locations) {
                    info!(locations = locations.len(), "distance matrix cache hit");
                    return Ok(matrix);
                }
            }
        }

        let chain: Vec<&Provider> = match force_provider {
            Some(name) => {
                let selected: Vec<&Provider> = self
                    .providers
                    .iter()
                    .filter(|p| p.name() == name)
                    .collect();
                if selected.is_empty() {
                    return Err(Error::invalid(format!("provider '{name}' not available")));
                }
                selected
            }
            None => self.providers.iter().collect(),
        };

        let mut last_error: Option<Error> = None;
        for provider in chain {
            match provider.calculate_matrix(locations).await {
                Ok(matrix) => {
                    info!(provider = provider.name(), "distance matrix calculated");
                    if !skip_cache {
                        if let Some(cache) = &self.cache {
                            cache.set(&matrix, None);
                        }
                    }
                    return Ok(matrix);
                }
                Err(e) => {
                    warn!(provider = provider.name(), "provider failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::ProviderUnavailable(
            last_error.map_or_else(|| "no providers configured".to_string(), |e| e.to_string()),
        ))
    }

    /// Traffic-aware matrix for a departure instant when the head provider
    /// supports it; falls back to the regular chain otherwise. Traffic-aware
    /// results are not cached — they are departure-time-specific.
    pub async fn calculate_matrix_with_traffic(
        &self,
        locations: &[Location],
        departure_time: i64,
    ) -> Result<DistanceMatrix> {
        if let Some(Provider::GoogleMaps(google)) = self.providers.first() {
            match google
                .calculate_with_traffic(locations, Some(departure_time))
                .await
            {
                Ok(matrix) => return Ok(matrix),
                Err(e) => warn!("traffic-aware matrix failed, using fallback chain: {e}"),
            }
        }
        self.calculate_matrix(locations, None, false).await
    }

    /// Distance and duration between a single pair.
    pub async fn travel_time(&self, origin: Location, destination: Location) -> Result<TravelTime> {
        let matrix = self
            .calculate_matrix(&[origin, destination], None, false)
            .await?;
        Ok(matrix.travel_time(0, 1))
    }

    /// Probes every provider with a trivial request.
    pub async fn provider_status(&self) -> Vec<(&'static str, bool)> {
        let probe = [Location { latitude: 0.0, longitude: 0.0 }];
        let mut status = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let ok = provider.calculate_matrix(&probe).await.is_ok();
            status.push((provider.name(), ok));
        }
        status
    }

    pub fn cache_statistics(&self) -> Option<CacheStatistics> {
        self.cache.as_ref().map(|c| c.statistics())
    }

    pub fn clear_expired_cache(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.clear_expired())
    }
}
