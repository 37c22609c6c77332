use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{GeofenceError, LatLng, Polygon};

#[derive(Debug, Error)]
pub enum CourseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("course has no holes")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub kind: String,
    pub point: LatLng,
}

/// One hole. Tee and green are optional because unsurveyed holes exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    pub number: u32,
    pub tee: Option<LatLng>,
    pub green: Option<LatLng>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hazards: Vec<Hazard>,
    /// Playing-area polygon in EWKT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence: Option<String>,
}

impl Hole {
    pub fn new(number: u32, tee: Option<LatLng>, green: Option<LatLng>) -> Self {
        Self {
            number,
            tee,
            green,
            hazards: Vec::new(),
            geofence: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGeometry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub holes: Vec<Hole>,
    /// Course-wide bounding polygon in EWKT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<String>,
}

impl CourseGeometry {
    pub fn new(holes: Vec<Hole>) -> Self {
        Self {
            slug: None,
            holes,
            boundary: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CourseError> {
        let content = std::fs::read_to_string(path)?;
        let course: CourseGeometry = serde_json::from_str(&content)?;
        if course.holes.is_empty() {
            return Err(CourseError::Empty);
        }
        Ok(course)
    }

    pub fn hole(&self, number: u32) -> Option<&Hole> {
        self.holes.iter().find(|h| h.number == number)
    }

    pub fn first_hole(&self) -> Option<u32> {
        self.holes.first().map(|h| h.number)
    }

    pub fn boundary_polygon(&self) -> Option<Result<Polygon, GeofenceError>> {
        self.boundary.as_deref().map(Polygon::from_ewkt)
    }
}
