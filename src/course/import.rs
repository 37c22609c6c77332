//! Course import from surveyed GPX waypoints.
//!
//! Waypoints are matched by name: `Tee_NN`, `Green_NN` and `Hazard_NN_<type>`
//! where `NN` is the two-digit hole number. Anything else is ignored.

use std::collections::BTreeMap;

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::types::{CourseGeometry, Hazard, Hole};
use crate::geo::{course_boundary, hole_geofence, GeofenceError, LatLng, BOUNDARY_MARGIN_M};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("waypoint '{name}': {message}")]
    InvalidWaypoint { name: String, message: String },
    #[error("Tee_{hole:02} has no matching Green_{hole:02}")]
    MissingGreen { hole: u32 },
    #[error("no hole waypoints found")]
    NoHoles,
    #[error("geofence error: {0}")]
    Geofence(#[from] GeofenceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub name: String,
    pub point: LatLng,
}

#[derive(Debug, PartialEq)]
enum Role {
    Tee(u32),
    Green(u32),
    Hazard(u32, String),
}

#[derive(Default)]
struct PendingHole {
    tee: Option<LatLng>,
    green: Option<LatLng>,
    hazards: Vec<Hazard>,
}

/// Builds course geometry, per-hole geofences and the course boundary from a
/// GPX document.
pub fn import_gpx(xml: &str) -> Result<CourseGeometry, ImportError> {
    let waypoints = parse_waypoints(xml)?;
    let mut pending: BTreeMap<u32, PendingHole> = BTreeMap::new();

    for wpt in waypoints {
        let Some(role) = classify(&wpt.name) else {
            debug!("Ignoring waypoint {}", wpt.name);
            continue;
        };
        match role {
            Role::Tee(n) => {
                let hole = pending.entry(n).or_default();
                if hole.tee.replace(wpt.point).is_some() {
                    warn!("Duplicate {}, keeping the last one", wpt.name);
                }
            }
            Role::Green(n) => {
                let hole = pending.entry(n).or_default();
                if hole.green.replace(wpt.point).is_some() {
                    warn!("Duplicate {}, keeping the last one", wpt.name);
                }
            }
            Role::Hazard(n, kind) => pending.entry(n).or_default().hazards.push(Hazard {
                kind,
                point: wpt.point,
            }),
        }
    }

    if pending.is_empty() {
        return Err(ImportError::NoHoles);
    }

    let mut holes = Vec::with_capacity(pending.len());
    let mut anchors = Vec::new();
    for (number, p) in pending {
        let geofence = match (p.tee, p.green) {
            (Some(tee), Some(green)) => Some(hole_geofence(tee, green).to_ewkt()),
            (Some(_), None) => return Err(ImportError::MissingGreen { hole: number }),
            _ => None,
        };
        anchors.extend(p.tee);
        anchors.extend(p.green);
        holes.push(Hole {
            number,
            tee: p.tee,
            green: p.green,
            hazards: p.hazards,
            geofence,
        });
    }

    let boundary = course_boundary(&anchors, BOUNDARY_MARGIN_M)?;

    Ok(CourseGeometry {
        slug: None,
        holes,
        boundary: Some(boundary.to_ewkt()),
    })
}

/// Extracts every `<wpt lat=".." lon=".."><name>..</name></wpt>`.
pub fn parse_waypoints(xml: &str) -> Result<Vec<Waypoint>, ImportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut waypoints = Vec::new();

    let mut active: Option<(Option<LatLng>, Option<String>)> = None;
    let mut in_name = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"wpt" => active = Some((parse_position(&element)?, None)),
                b"name" if active.is_some() => in_name = true,
                _ => {}
            },
            Event::Text(text) => {
                if let (true, Some((_, name))) = (in_name, active.as_mut()) {
                    let text = std::str::from_utf8(text.as_ref()).unwrap_or("").trim();
                    if !text.is_empty() {
                        *name = Some(text.to_string());
                    }
                }
            }
            Event::End(end) => match end.local_name().as_ref() {
                b"name" => in_name = false,
                b"wpt" => {
                    if let Some((position, name)) = active.take() {
                        let name = name.unwrap_or_default();
                        let point = position.ok_or_else(|| ImportError::InvalidWaypoint {
                            name: name.clone(),
                            message: "missing lat/lon".into(),
                        })?;
                        waypoints.push(Waypoint { name, point });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(waypoints)
}

fn parse_position(element: &BytesStart<'_>) -> Result<Option<LatLng>, ImportError> {
    let mut lat = None;
    let mut lng = None;

    for attr in element.attributes().with_checks(false) {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = std::str::from_utf8(attr.value.as_ref()).unwrap_or("").trim();
        let parsed = || {
            value.parse::<f64>().map_err(|e| ImportError::InvalidWaypoint {
                name: String::new(),
                message: format!("bad coordinate '{}': {}", value, e),
            })
        };
        match attr.key.as_ref() {
            b"lat" => lat = Some(parsed()?),
            b"lon" => lng = Some(parsed()?),
            _ => {}
        }
    }

    Ok(lat.zip(lng).map(|(lat, lng)| LatLng::new(lat, lng)))
}

fn classify(name: &str) -> Option<Role> {
    if let Some(rest) = name.strip_prefix("Tee_") {
        return hole_number(rest).map(Role::Tee);
    }
    if let Some(rest) = name.strip_prefix("Green_") {
        return hole_number(rest).map(Role::Green);
    }
    let (number, kind) = name.strip_prefix("Hazard_")?.split_once('_')?;
    if kind.is_empty() {
        return None;
    }
    hole_number(number).map(|n| Role::Hazard(n, kind.to_lowercase()))
}

fn hole_number(digits: &str) -> Option<u32> {
    if digits.len() == 2 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}
