//! Distance providers: a uniform contract over external routing services and
//! the geodesic fallback, dispatched through a tagged enum.

mod geodesic;
mod google;
mod osrm;

pub use geodesic::GeodesicProvider;
pub use google::GoogleMapsProvider;
pub use osrm::OsrmProvider;

use crate::distance::matrix::DistanceMatrix;
use crate::domain::Location;
use crate::error::Result;

/// Uniform provider contract: a square distance+duration matrix for a set of
/// locations. Empty input is `InvalidInput`; a single location yields a 1×1
/// zero matrix.
pub trait DistanceProvider {
    fn name(&self) -> &'static str;

    fn calculate_matrix(
        &self,
        locations: &[Location],
    ) -> impl std::future::Future<Output = Result<DistanceMatrix>> + Send;
}

/// Concrete providers behind one dispatchable type, ordered into a chain by
/// the distance service.
pub enum Provider {
    GoogleMaps(GoogleMapsProvider),
    Osrm(OsrmProvider),
    Geodesic(GeodesicProvider),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::GoogleMaps(p) => p.name(),
            Provider::Osrm(p) => p.name(),
            Provider::Geodesic(p) => p.name(),
        }
    }

    pub async fn calculate_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix> {
        match self {
            Provider::GoogleMaps(p) => p.calculate_matrix(locations).await,
            Provider::Osrm(p) => p.calculate_matrix(locations).await,
            Provider::Geodesic(p) => p.calculate_matrix(locations).await,
        }
    }

    /// Whether the provider can produce traffic-aware durations.
    pub fn traffic_capable(&self) -> bool {
        matches!(self, Provider::GoogleMaps(_))
    }
}
