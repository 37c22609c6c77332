use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use log::{info, warn};
use serde::Deserialize;

use super::error::PositionError;
use super::source::{FixStream, LocationProvider};
use super::types::GpsFix;

const DEFAULT_ACCURACY_M: f64 = 5.0;

/// Replays a recorded walk, one JSON object per line:
/// `{"lat": 51.5, "lng": -0.12, "accuracy": 4.0}`. Fixes are re-stamped with
/// the wall clock as they are emitted.
pub struct ReplayProvider {
    path: PathBuf,
    interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    lat: f64,
    lng: f64,
    #[serde(default = "default_accuracy")]
    accuracy: f64,
}

fn default_accuracy() -> f64 {
    DEFAULT_ACCURACY_M
}

impl ReplayProvider {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self { path, interval }
    }
}

impl LocationProvider for ReplayProvider {
    fn watch(&self) -> FixStream {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read replay file {}: {}", self.path.display(), e);
                return Box::pin(stream::iter([Err::<GpsFix, _>(
                    PositionError::PositionUnavailable,
                )]));
            }
        };

        let records = parse_records(&content);
        info!(
            "Replaying {} fixes from {}",
            records.len(),
            self.path.display()
        );

        let interval = self.interval;
        Box::pin(stream::iter(records).then(move |record| async move {
            tokio::time::sleep(interval).await;
            Ok::<_, PositionError>(GpsFix {
                lat: record.lat,
                lng: record.lng,
                accuracy: record.accuracy,
                timestamp: Utc::now(),
            })
        }))
    }
}

fn parse_records(content: &str) -> Vec<ReplayRecord> {
    content
        .lines()
        .enumerate()
        .map(|(i, l)| (i, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|(i, l)| match serde_json::from_str(l) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping replay line {}: {}", i + 1, e);
                None
            }
        })
        .collect()
}
