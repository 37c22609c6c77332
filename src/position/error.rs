use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position")]
    Timeout,
}

impl PositionError {
    /// Short hint for whoever is holding the device.
    pub fn hint(&self) -> &'static str {
        match self {
            PositionError::PermissionDenied => "grant location access and restart the session",
            PositionError::PositionUnavailable => "no GPS signal, move into the open",
            PositionError::Timeout => "GPS is slow to respond, keep the device still",
        }
    }
}
