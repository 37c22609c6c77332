//! Realtime wire format. Every frame is a JSON text message of the shape
//! `{"event": "<name>", "data": <payload>}`.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::error::TransportError;

/// Channel carrying live positions for one scope, e.g. `course:42:positions`.
pub fn room_name(scope: &str, id: &str) -> String {
    format!("{}:{}:positions", scope, id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub session_id: String,
    pub course_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "room:join")]
    JoinRoom { room: String },
    #[serde(rename = "room:leave")]
    LeaveRoom { room: String },
    #[serde(rename = "auth:refresh")]
    RefreshAuth { token: String },
    #[serde(rename = "position:update")]
    PositionUpdate(PositionUpdate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    AuthRefreshed,
    Broadcast(PositionUpdate),
    Error(String),
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parses one inbound frame. Unknown events are not an error and yield `None`.
pub fn parse_server_message(text: &str) -> Result<Option<ServerMessage>, TransportError> {
    let raw: RawEvent = serde_json::from_str(text)?;
    let message = match raw.event.as_str() {
        "auth:refreshed" => ServerMessage::AuthRefreshed,
        "position:broadcast" => ServerMessage::Broadcast(serde_json::from_value(raw.data)?),
        "error" => ServerMessage::Error(error_text(&raw.data)),
        other => {
            debug!("Ignoring unknown event '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(message))
}

fn error_text(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => data.to_string(),
        },
        _ => data.to_string(),
    }
}
