use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;

use super::error::PositionError;
use super::source::{FixStream, LocationProvider};
use super::types::GpsFix;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
/// Reported when gpsd gives no error estimate for a fix.
const UNKNOWN_ACCURACY_M: f64 = 50.0;

/// Reads fixes from a gpsd daemon (`TPV` reports over its JSON protocol).
pub struct GpsdProvider {
    address: String,
    timeout: Duration,
}

impl GpsdProvider {
    pub fn new(address: String, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

enum WatchState {
    Connect,
    Reading(Lines<BufReader<TcpStream>>),
    Done,
}

enum Report {
    Fix(GpsFix),
    Error(PositionError),
    Closed,
}

impl LocationProvider for GpsdProvider {
    fn watch(&self) -> FixStream {
        let address = self.address.clone();
        let timeout = self.timeout;

        Box::pin(stream::unfold(WatchState::Connect, move |state| {
            let address = address.clone();
            async move {
                let mut lines = match state {
                    WatchState::Done => return None,
                    WatchState::Reading(lines) => lines,
                    WatchState::Connect => match open_watch(&address).await {
                        Ok(lines) => lines,
                        Err(err) => return Some((Err(err), WatchState::Done)),
                    },
                };

                match next_report(&mut lines, timeout).await {
                    Report::Fix(fix) => Some((Ok(fix), WatchState::Reading(lines))),
                    Report::Error(err) => Some((Err(err), WatchState::Reading(lines))),
                    Report::Closed => Some((
                        Err(PositionError::PositionUnavailable),
                        WatchState::Done,
                    )),
                }
            }
        }))
    }
}

async fn open_watch(address: &str) -> Result<Lines<BufReader<TcpStream>>, PositionError> {
    let mut socket = TcpStream::connect(address).await.map_err(|e| {
        warn!("Cannot reach gpsd at {}: {}", address, e);
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => PositionError::PermissionDenied,
            _ => PositionError::PositionUnavailable,
        }
    })?;

    socket.write_all(WATCH_COMMAND).await.map_err(|e| {
        warn!("Failed to enable gpsd watch mode: {}", e);
        PositionError::PositionUnavailable
    })?;

    info!("Watching gpsd at {}", address);
    Ok(BufReader::new(socket).lines())
}

async fn next_report(lines: &mut Lines<BufReader<TcpStream>>, timeout: Duration) -> Report {
    loop {
        let line = match tokio::time::timeout(timeout, lines.next_line()).await {
            Err(_) => return Report::Error(PositionError::Timeout),
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Report::Closed,
            Ok(Err(e)) => {
                warn!("gpsd read error: {}", e);
                return Report::Closed;
            }
        };

        match parse_report(&line) {
            Some(Ok(fix)) => return Report::Fix(fix),
            Some(Err(err)) => return Report::Error(err),
            None => continue,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

/// Maps one gpsd JSON line. Non-`TPV` classes yield `None`.
fn parse_report(line: &str) -> Option<Result<GpsFix, PositionError>> {
    let report: GpsdReport = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => {
            debug!("Ignoring unparseable gpsd line: {}", e);
            return None;
        }
    };

    if report.class != "TPV" {
        return None;
    }

    // mode 0/1: no fix yet
    let (lat, lng) = match (report.mode, report.lat, report.lon) {
        (mode, Some(lat), Some(lon)) if mode >= 2 => (lat, lon),
        _ => return Some(Err(PositionError::PositionUnavailable)),
    };

    let accuracy = report
        .eph
        .or_else(|| match (report.epx, report.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(UNKNOWN_ACCURACY_M);

    Some(Ok(GpsFix {
        lat,
        lng,
        accuracy,
        timestamp: report.time.unwrap_or_else(Utc::now),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn three_d_fix_becomes_a_gps_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2024-05-01T10:00:00.000Z","lat":51.5,"lon":-0.12,"eph":4.2}"#;
        let fix = parse_report(line).unwrap().unwrap();
        assert_eq!(fix.lat, 51.5);
        assert_eq!(fix.lng, -0.12);
        assert_eq!(fix.accuracy, 4.2);
        assert_eq!(fix.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn falls_back_to_epx_epy_for_accuracy() {
        let line = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0,"epx":3.0,"epy":7.5}"#;
        assert_eq!(parse_report(line).unwrap().unwrap().accuracy, 7.5);
    }

    #[test]
    fn no_fix_is_position_unavailable() {
        let line = r#"{"class":"TPV","mode":1}"#;
        assert_eq!(
            parse_report(line),
            Some(Err(PositionError::PositionUnavailable))
        );
    }

    #[test]
    fn other_classes_are_ignored() {
        assert_eq!(parse_report(r#"{"class":"SKY","satellites":[]}"#), None);
        assert_eq!(parse_report("not json"), None);
    }

    #[tokio::test]
    async fn streams_fixes_from_a_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"?WATCH="));
            socket
                .write_all(
                    b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\n\
                      {\"class\":\"TPV\",\"mode\":3,\"lat\":10.0,\"lon\":20.0,\"eph\":3.0}\n",
                )
                .await
                .unwrap();
        });

        let provider = GpsdProvider::new(address, Duration::from_secs(2));
        let mut fixes = provider.watch();

        let first = fixes.next().await.unwrap().unwrap();
        assert_eq!((first.lat, first.lng), (10.0, 20.0));
        assert_eq!(
            fixes.next().await,
            Some(Err(PositionError::PositionUnavailable))
        );
        assert!(fixes.next().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_daemon_reports_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let provider = GpsdProvider::new(address, Duration::from_secs(1));
        let mut fixes = provider.watch();
        assert_eq!(
            fixes.next().await,
            Some(Err(PositionError::PositionUnavailable))
        );
        assert!(fixes.next().await.is_none());
    }
}
