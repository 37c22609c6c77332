use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::course::{CourseGeometry, Hole};
use crate::storage::QueuedPosition;

/// Body of `POST /positions/batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub session_id: String,
    pub positions: Vec<BatchPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPosition {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<&QueuedPosition> for BatchPosition {
    fn from(p: &QueuedPosition) -> Self {
        BatchPosition {
            lat: p.lat,
            lng: p.lng,
            accuracy: p.accuracy,
            recorded_at: p.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// `GET /courses/{slug}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseResponse {
    pub slug: String,
    pub data_version: u64,
    pub holes: Vec<Hole>,
    #[serde(default)]
    pub boundary: Option<String>,
}

impl CourseResponse {
    pub fn into_geometry(self) -> CourseGeometry {
        CourseGeometry {
            slug: Some(self.slug),
            holes: self.holes,
            boundary: self.boundary,
        }
    }
}

/// `GET /courses/{slug}/version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseVersion {
    pub data_version: u64,
}
