// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Distances on the WGS84 ellipsoid
//!
//! All functions take coordinates in degrees and return meters. They share
//! the [`DistanceFn`] shape so callers can inject whichever formula suits
//! their accuracy needs.

/// `distance(lat1, lon1, lat2, lon2) -> meters`
pub type DistanceFn = fn(f64, f64, f64, f64) -> f64;

/// WGS84 equatorial radius (semi-major axis), meters
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 polar radius (semi-minor axis), meters
pub const WGS84_B: f64 = 6_356_752.314245;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE_THRESHOLD: f64 = 1e-12;

/// Equirectangular distance between two close points
///
/// Meters per degree are corrected for the ellipsoid at the mean latitude.
pub fn earth_distance_small(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi = ((lat1 + lat2) / 2.0).to_radians();
    let m_per_deg = 111_132.954 - 559.822 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos();
    let dlat = (lat1 - lat2) * m_per_deg;
    let dlon = (lon1 - lon2) * m_per_deg * phi.cos();
    dlat.hypot(dlon)
}

/// Vincenty inverse distance, accurate to about a millimeter
///
/// Falls back to [`earth_distance_small`] when the iteration does not
/// converge (nearly antipodal points).
pub fn earth_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let l = (lon1 - lon2).to_radians();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = None;
    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0;
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - previous).abs() < CONVERGENCE_THRESHOLD {
            converged = Some((sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m));
            break;
        }
    }

    let Some((sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m)) = converged else {
        return earth_distance_small(lat1, lon1, lat2, lon2);
    };

    let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = b
        * sin_sigma
        * (cos_2sigma_m
            + b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                    - b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma.powi(2))
                        * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
    WGS84_B * a * (sigma - delta_sigma)
}

/// East and north displacement of `(lat, lon)` from a reference point
///
/// Returns `(east, north)` in meters; each component is positive when the
/// point lies east (resp. north) of the reference.
pub fn meter_offset(
    distance: DistanceFn,
    ref_lat: f64,
    ref_lon: f64,
    lat: f64,
    lon: f64,
) -> (f64, f64) {
    let mut east = distance(ref_lat, ref_lon, ref_lat, lon);
    let mut north = distance(ref_lat, ref_lon, lat, ref_lon);
    if lon < ref_lon {
        east = -east;
    }
    if lat < ref_lat {
        north = -north;
    }
    (east, north)
}
