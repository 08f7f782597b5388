//! Geodesic distance on the WGS-84 ellipsoid.
//!
//! [`haversine`] is the workhorse: constant time, accurate to ~0.5% which is
//! plenty for routing estimates. [`vincenty`] is available where sub-meter
//! accuracy matters; it falls back to haversine when the iteration fails to
//! converge (near-antipodal pairs).

use crate::domain::Location;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// WGS-84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_CONVERGENCE: f64 = 1e-12;

/// Great-circle distance between two points in meters.
pub fn haversine(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Ellipsoidal distance between two points in meters (Vincenty inverse).
///
/// Falls back to [`haversine`] when the lambda iteration does not converge
/// within 200 rounds.
pub fn vincenty(a: Location, b: Location) -> f64 {
    if a.latitude == b.latitude && a.longitude == b.longitude {
        return 0.0;
    }

    let f = WGS84_F;
    let big_a = WGS84_A;
    let big_b = big_a * (1.0 - f); // semi-minor axis

    let u1 = ((1.0 - f) * a.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * b.latitude.to_radians().tan()).atan();
    let l = (b.longitude - a.longitude).to_radians();

    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;
    let mut sin_sigma = 0.0;
    let mut cos_sigma = 0.0;
    let mut sigma = 0.0;
    let mut cos_sq_alpha = 0.0;
    let mut cos_2sigma_m = 0.0;

    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();

        if sin_sigma == 0.0 {
            return 0.0; // coincident points
        }

        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);

        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0 // equatorial line
        };

        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m
                            + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - lambda_prev).abs() < VINCENTY_CONVERGENCE {
            converged = true;
            break;
        }
    }

    if !converged {
        return haversine(a, b);
    }

    let u_sq = cos_sq_alpha * (big_a * big_a - big_b * big_b) / (big_b * big_b);
    let coef_a =
        1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let coef_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let delta_sigma = coef_b
        * sin_sigma
        * (cos_2sigma_m
            + coef_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                    - coef_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

    big_b * coef_a * (sigma - delta_sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon).unwrap()
    }

    #[test]
    fn haversine_one_degree_of_longitude_at_equator() {
        let d = haversine(loc(0.0, 0.0), loc(0.0, 1.0));
        assert!(d > 111_000.0 && d < 112_000.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = loc(-33.4489, -70.6693);
        assert_eq!(haversine(p, p), 0.0);
    }

    #[test]
    fn haversine_santiago_to_valparaiso() {
        // ~100 km as the crow flies.
        let d = haversine(loc(-33.4489, -70.6693), loc(-33.0472, -71.6127));
        assert!(d > 90_000.0 && d < 110_000.0, "got {d}");
    }

    #[test]
    fn vincenty_close_to_haversine_for_short_distances() {
        let a = loc(-33.4489, -70.6693);
        let b = loc(-33.4372, -70.6506);
        let hav = haversine(a, b);
        let vin = vincenty(a, b);
        // Ellipsoidal correction is under 1% at this scale.
        assert!((hav - vin).abs() / hav < 0.01, "hav={hav} vin={vin}");
    }

    #[test]
    fn vincenty_zero_for_same_point() {
        let p = loc(10.0, 20.0);
        assert_eq!(vincenty(p, p), 0.0);
    }

    #[test]
    fn vincenty_near_antipodal_does_not_panic() {
        // Near-antipodal pairs may not converge; the haversine fallback keeps
        // the result finite and plausible (roughly half the circumference).
        let d = vincenty(loc(0.0, 0.0), loc(0.5, 179.7));
        assert!(d > 19_000_000.0 && d < 20_100_000.0, "got {d}");
    }
}
