use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geodesic::{bearing, destination, distance, LatLng};

/// Spatial reference of every polygon we emit (WGS 84).
pub const SRID: u32 = 4326;
/// Margin added around the outermost tee/green points of a course.
pub const BOUNDARY_MARGIN_M: f64 = 50.0;

const MIN_BUFFER_M: f64 = 100.0;
const BUFFER_RATIO: f64 = 0.6;

#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("cannot build a boundary from zero points")]
    NoPoints,
    #[error("invalid polygon: {0}")]
    InvalidPolygon(String),
}

/// A closed ring of points. The first point is repeated as the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<LatLng>,
}

impl Polygon {
    fn closed(mut corners: Vec<LatLng>) -> Self {
        if let Some(first) = corners.first().copied() {
            corners.push(first);
        }
        Self { ring: corners }
    }

    /// Renders the ring as EWKT, `lng lat` ordered.
    pub fn to_ewkt(&self) -> String {
        let mut out = format!("SRID={};POLYGON((", SRID);
        for (i, point) in self.ring.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{:.7} {:.7}", point.lng, point.lat);
        }
        out.push_str("))");
        out
    }

    /// Parses the EWKT produced by [`Polygon::to_ewkt`].
    pub fn from_ewkt(ewkt: &str) -> Result<Self, GeofenceError> {
        let invalid = |msg: &str| GeofenceError::InvalidPolygon(msg.to_string());

        let body = ewkt
            .trim()
            .strip_prefix(&format!("SRID={};", SRID))
            .ok_or_else(|| invalid("missing SRID prefix"))?;
        let coords = body
            .strip_prefix("POLYGON((")
            .and_then(|s| s.strip_suffix("))"))
            .ok_or_else(|| invalid("expected POLYGON((...))"))?;

        let ring = coords
            .split(',')
            .map(|pair| {
                let mut parts = pair.split_whitespace();
                let lng = parts.next().and_then(|v| v.parse().ok());
                let lat = parts.next().and_then(|v| v.parse().ok());
                match (lng, lat, parts.next()) {
                    (Some(lng), Some(lat), None) => Ok(LatLng { lat, lng }),
                    _ => Err(invalid(&format!("bad coordinate '{}'", pair.trim()))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if ring.len() < 4 || ring.first() != ring.last() {
            return Err(invalid("ring must be closed with at least four points"));
        }
        Ok(Self { ring })
    }

    /// Ray-casting point-in-polygon test on the lng/lat plane.
    pub fn contains(&self, point: LatLng) -> bool {
        let mut inside = false;
        let n = self.ring.len();
        if n < 4 {
            return false;
        }
        let mut j = n - 2;
        for i in 0..n - 1 {
            let a = self.ring[i];
            let b = self.ring[j];
            if (a.lat > point.lat) != (b.lat > point.lat) {
                let cross_lng = (b.lng - a.lng) * (point.lat - a.lat) / (b.lat - a.lat) + a.lng;
                if point.lng < cross_lng {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Half-width of a hole's geofence for a given tee-to-green length.
pub fn buffer_half_width(hole_length_m: f64) -> f64 {
    (BUFFER_RATIO * hole_length_m).max(MIN_BUFFER_M)
}

/// Rectangle around the tee→green axis, extended by the buffer on every side.
pub fn hole_geofence(tee: LatLng, green: LatLng) -> Polygon {
    let buffer = buffer_half_width(distance(tee, green));
    let axis = bearing(tee, green);

    let back = destination(tee, buffer, axis + PI);
    let front = destination(green, buffer, axis);

    Polygon::closed(vec![
        destination(back, buffer, axis - FRAC_PI_2),
        destination(back, buffer, axis + FRAC_PI_2),
        destination(front, buffer, axis + FRAC_PI_2),
        destination(front, buffer, axis - FRAC_PI_2),
    ])
}

/// Axis-aligned bounding polygon around all points, widened by `margin_m`.
pub fn course_boundary(points: &[LatLng], margin_m: f64) -> Result<Polygon, GeofenceError> {
    let first = points.first().ok_or(GeofenceError::NoPoints)?;

    let (mut south, mut north) = (first.lat, first.lat);
    let (mut west, mut east) = (first.lng, first.lng);
    for p in &points[1..] {
        south = south.min(p.lat);
        north = north.max(p.lat);
        west = west.min(p.lng);
        east = east.max(p.lng);
    }

    let center = LatLng::new((south + north) / 2.0, (west + east) / 2.0);
    let north = destination(LatLng::new(north, center.lng), margin_m, 0.0).lat;
    let south = destination(LatLng::new(south, center.lng), margin_m, PI).lat;
    // Widen longitudes at the latitude where a meter spans the most degrees.
    let widest_lat = if north.abs() > south.abs() { north } else { south };
    let east = destination(LatLng::new(widest_lat, east), margin_m, FRAC_PI_2).lng;
    let west = destination(LatLng::new(widest_lat, west), margin_m, -FRAC_PI_2).lng;

    Ok(Polygon::closed(vec![
        LatLng::new(south, west),
        LatLng::new(south, east),
        LatLng::new(north, east),
        LatLng::new(north, west),
    ]))
}
