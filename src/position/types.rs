use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

/// A single location sample. `accuracy` is the horizontal error radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl GpsFix {
    pub fn point(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}
