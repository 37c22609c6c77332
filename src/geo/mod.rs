mod geodesic;
mod geofence;

pub use geodesic::{distance, LatLng};
pub use geofence::{course_boundary, hole_geofence, GeofenceError, Polygon, BOUNDARY_MARGIN_M};

#[cfg(test)]
pub(crate) use geodesic::destination;
