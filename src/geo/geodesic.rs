use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean Earth radius used for all spherical computations.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point on the sphere in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Parses `"lat,lng"`, the same comma form used on the command line.
    pub fn from_coordinates(coordinates: &str) -> Option<Self> {
        let parts: Vec<_> = coordinates.split(',').map(|s| s.trim()).collect();
        if parts.len() != 2 {
            return None;
        }
        let lat = parts[0].parse().ok()?;
        let lng = parts[1].parse().ok()?;
        Some(Self { lat, lng })
    }

    pub fn lat_rad(&self) -> f64 {
        self.lat.to_radians()
    }

    pub fn lng_rad(&self) -> f64 {
        self.lng.to_radians()
    }
}

/// Great-circle distance in meters (haversine).
pub fn distance(a: LatLng, b: LatLng) -> f64 {
    let dlat = b.lat_rad() - a.lat_rad();
    let dlng = b.lng_rad() - a.lng_rad();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat_rad().cos() * b.lat_rad().cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` towards `to`, in radians clockwise from north.
pub fn bearing(from: LatLng, to: LatLng) -> f64 {
    let lat1 = from.lat_rad();
    let lat2 = to.lat_rad();
    let dlng = to.lng_rad() - from.lng_rad();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    y.atan2(x)
}

/// Point reached by travelling `distance_m` from `origin` along the great
/// circle that starts at `bearing_rad`.
pub fn destination(origin: LatLng, distance_m: f64, bearing_rad: f64) -> LatLng {
    let delta = distance_m / EARTH_RADIUS_M;
    let lat1 = origin.lat_rad();
    let lng1 = origin.lng_rad();

    let sin_lat2 = lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();
    let lng2 = lng1
        + (bearing_rad.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * sin_lat2);

    LatLng {
        lat: lat2.to_degrees(),
        lng: normalize_lng(lng2).to_degrees(),
    }
}

fn normalize_lng(lng_rad: f64) -> f64 {
    (lng_rad + 3.0 * PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS: &[(LatLng, LatLng)] = &[
        (
            LatLng { lat: 52.0, lng: 4.0 },
            LatLng { lat: 52.001, lng: 4.002 },
        ),
        (
            LatLng { lat: -33.86, lng: 151.2 },
            LatLng { lat: -33.87, lng: 151.21 },
        ),
        (
            LatLng { lat: 69.65, lng: 18.95 },
            LatLng { lat: 69.652, lng: 18.99 },
        ),
        (
            LatLng { lat: 84.9, lng: -40.0 },
            LatLng { lat: 84.91, lng: -39.5 },
        ),
        (
            LatLng { lat: 0.0, lng: 179.999 },
            LatLng { lat: 0.001, lng: -179.999 },
        ),
    ];

    #[test]
    fn distance_to_self_is_zero() {
        let p = LatLng::new(51.5, -0.12);
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        for (a, b) in PAIRS {
            assert!((distance(*a, *b) - distance(*b, *a)).abs() < 1e-6);
        }
    }

    #[test]
    fn one_degree_of_longitude_on_the_equator() {
        let d = distance(LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn bearing_points_north_and_east() {
        let origin = LatLng::new(10.0, 10.0);
        let north = bearing(origin, LatLng::new(10.1, 10.0));
        let east = bearing(origin, LatLng::new(10.0, 10.1));
        assert!(north.abs() < 1e-9);
        assert!((east - PI / 2.0).abs() < 1e-3);
    }

    #[test]
    fn destination_round_trips_within_a_meter() {
        for (origin, target) in PAIRS {
            let projected = destination(*origin, distance(*origin, *target), bearing(*origin, *target));
            let error = distance(projected, *target);
            assert!(error < 1.0, "{origin:?} -> {target:?} missed by {error} m");
        }
    }

    #[test]
    fn destination_wraps_the_antimeridian() {
        let p = destination(LatLng::new(0.0, 179.9999), 100.0, PI / 2.0);
        assert!(p.lng < -179.0, "got {}", p.lng);
    }

    #[test]
    fn parses_coordinate_pairs() {
        assert_eq!(
            LatLng::from_coordinates("52.1, 4.3"),
            Some(LatLng::new(52.1, 4.3))
        );
        assert_eq!(LatLng::from_coordinates("52.1"), None);
        assert_eq!(LatLng::from_coordinates("a,b"), None);
    }
}
