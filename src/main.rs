mod api;
mod config;
mod course;
mod geo;
mod position;
mod storage;
mod telemetry;
mod transport;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::api::{ApiClient, AuthSession, AuthState, Credentials};
use crate::config::{Config, PositionConfig};
use crate::course::{import_gpx, CourseCache, CourseGeometry, HoleDetector};
use crate::geo::{hole_geofence, LatLng};
use crate::position::{GpsdProvider, LocationProvider, PositionSource, PositionState, ReplayProvider};
use crate::storage::{FileStore, KeyValueStore, PositionQueue};
use crate::telemetry::{QueueReplayer, SessionParams, TelemetryContext, TelemetryLoop};

#[derive(Parser)]
#[command(name = "course-tracker")]
#[command(about = "Golf course position tracking and live telemetry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a round: detect the current hole and stream positions
    Run {
        #[arg(long)]
        config: String,
        /// Course JSON file, or a course slug to fetch from the backend
        #[arg(long)]
        course: String,
        /// Session id (a random one is generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Build course geometry from a surveyed GPX file
    Import {
        gpx: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the geofence polygon for a tee/green pair
    Geofence {
        /// Tee as "lat,lng"
        #[arg(long, allow_hyphen_values = true)]
        tee: String,
        /// Green as "lat,lng"
        #[arg(long, allow_hyphen_values = true)]
        green: String,
    },
    /// Show positions waiting for upload
    Queue {
        #[arg(long)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            course,
            session,
        } => run(&config, &course, session).await,
        Commands::Import { gpx, out } => import(&gpx, out.as_deref()),
        Commands::Geofence { tee, green } => geofence(&tee, &green),
        Commands::Queue { config } => queue_status(&config).await,
    }
}

fn load_config(path: &str) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Error loading config {}: {}", path, e);
            None
        }
    }
}

async fn run(config_path: &str, course_arg: &str, session: Option<String>) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.storage.base_folder.clone()));
    let queue = Arc::new(PositionQueue::new(store.clone()));
    let auth = Arc::new(AuthSession::new(Credentials {
        access_token: config.api.access_token.clone(),
        refresh_token: config.api.refresh_token.clone(),
    }));
    let api = match ApiClient::new(&config.api.base_url, auth.clone(), config.api.request_timeout) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("Error creating API client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (course_id, course) = match load_course(course_arg, &api, store).await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading course {}: {}", course_arg, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Course {} with {} holes", course_id, course.holes.len());

    let provider: Arc<dyn LocationProvider> = match &config.position {
        PositionConfig::Gpsd {
            address, timeout, ..
        } => {
            Arc::new(GpsdProvider::new(address.clone(), *timeout))
        }
        PositionConfig::Replay { path, interval } => {
            Arc::new(ReplayProvider::new(path.clone(), *interval))
        }
    };
    let mut source = PositionSource::new(provider);
    source.start();

    let replayer = Arc::new(QueueReplayer::new(
        queue.clone(),
        api.clone(),
        config.telemetry.replay_batch_size,
    ));
    let mut telemetry = TelemetryLoop::new(TelemetryContext {
        queue: queue.clone(),
        replayer,
        positions: source.subscribe(),
        ws_url: config.api.ws_url.clone(),
        transport: (&config.transport).into(),
        sample_interval: config.telemetry.sample_interval,
        room_scope: config.telemetry.room_scope.clone(),
    });

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Session {}", session_id);
    telemetry
        .start_session(SessionParams {
            session_id,
            course_id,
            token: auth.access_token().unwrap_or_default(),
        })
        .await;

    let (manual_tx, manual_rx) = mpsc::unbounded_channel();
    spawn_manual_input(manual_tx);
    let holes = tokio::spawn(track_holes(course, source.subscribe(), manual_rx));

    let mut retry = config.position.retry_delay().map(|delay| {
        let mut interval = tokio::time::interval(delay);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    let mut exit = ExitCode::SUCCESS;
    let mut auth_rx = auth.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, ending session");
                break;
            }
            changed = auth_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = auth_rx.borrow_and_update().clone();
                match state {
                    AuthState::Active(credentials) => telemetry.refresh_auth(&credentials.access_token),
                    AuthState::Expired => {
                        error!("Session expired, sign in again");
                        exit = ExitCode::FAILURE;
                        break;
                    }
                }
            }
            _ = next_tick(&mut retry) => {
                source.restart_if_ended();
            }
        }
    }

    if let Some(params) = telemetry.session() {
        info!("Ending session {}", params.session_id);
    }
    telemetry.end_session().await;
    source.stop().await;
    holes.abort();

    let pending = queue.size().await;
    if pending > 0 {
        info!("{} positions queued for the next run", pending);
    }
    exit
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn load_course(
    arg: &str,
    api: &ApiClient,
    store: Arc<dyn KeyValueStore>,
) -> Result<(String, CourseGeometry), Box<dyn std::error::Error>> {
    let path = Path::new(arg);
    if path.is_file() {
        let course = CourseGeometry::from_file(path)?;
        let id = course.slug.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string())
        });
        return Ok((id, course));
    }

    let course = CourseCache::new(store).resolve(api, arg).await?;
    Ok((arg.to_string(), course))
}

/// Hole numbers typed on stdin become manual selections. A plain thread
/// keeps the blocking read off the runtime.
fn spawn_manual_input(tx: mpsc::UnboundedSender<u32>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<u32>() {
                Ok(hole) => {
                    if tx.send(hole).is_err() {
                        break;
                    }
                }
                Err(_) => warn!("Type a hole number to select it manually"),
            }
        }
    });
}

async fn track_holes(
    course: CourseGeometry,
    mut positions: watch::Receiver<PositionState>,
    mut manual: mpsc::UnboundedReceiver<u32>,
) {
    let mut detector = HoleDetector::new(&course);
    let boundary = match course.boundary_polygon() {
        Some(Ok(polygon)) => Some(polygon),
        Some(Err(e)) => {
            warn!("Ignoring invalid course boundary: {}", e);
            None
        }
        None => None,
    };

    let mut last = detector.status();
    let mut last_fix: Option<DateTime<Utc>> = None;
    let mut manual_open = true;
    info!("Starting on hole {}", last.current_hole);

    loop {
        let status = tokio::select! {
            changed = positions.changed() => {
                if changed.is_err() {
                    break;
                }
                let fix = positions.borrow_and_update().fix;
                // error-only updates repeat the previous fix
                let Some(fix) = fix.filter(|f| Some(f.timestamp) != last_fix) else {
                    continue;
                };
                last_fix = Some(fix.timestamp);
                if boundary.as_ref().is_some_and(|b| !b.contains(fix.point())) {
                    warn!("Fix {:.6},{:.6} is outside the course boundary", fix.lat, fix.lng);
                }
                detector.on_fix(&fix, &course, Utc::now())
            }
            hole = manual.recv(), if manual_open => match hole {
                Some(hole) if course.hole(hole).is_some() => detector.set_manual_hole(hole, Utc::now()),
                Some(hole) => {
                    warn!("Course has no hole {}", hole);
                    continue;
                }
                None => {
                    manual_open = false;
                    continue;
                }
            },
        };

        if status != last {
            if status.current_hole != last.current_hole {
                info!("Now playing hole {}", status.current_hole);
            }
            if status.near_green && !last.near_green {
                info!("On the green of hole {}", status.current_hole);
            }
            last = status;
        }
    }
}

fn import(path: &Path, out: Option<&Path>) -> ExitCode {
    let xml = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let course = match import_gpx(&xml) {
        Ok(course) => course,
        Err(e) => {
            eprintln!("Import failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let json = match serde_json::to_string_pretty(&course) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error encoding course: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match out {
        Some(out) => {
            if let Err(e) = fs::write(out, json) {
                eprintln!("Error writing {}: {}", out.display(), e);
                return ExitCode::FAILURE;
            }
            println!("Imported {} holes into {}", course.holes.len(), out.display());
        }
        None => println!("{}", json),
    }
    ExitCode::SUCCESS
}

fn geofence(tee: &str, green: &str) -> ExitCode {
    match (LatLng::from_coordinates(tee), LatLng::from_coordinates(green)) {
        (Some(tee), Some(green)) => {
            println!("{}", hole_geofence(tee, green).to_ewkt());
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Coordinates must look like \"lat,lng\"");
            ExitCode::FAILURE
        }
    }
}

async fn queue_status(config_path: &str) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let queue = PositionQueue::new(Arc::new(FileStore::new(config.storage.base_folder)));
    let items = queue.drain_all().await;
    println!("{} positions pending", items.len());
    if let (Some(first), Some(last)) = (items.first(), items.last()) {
        println!("  oldest: {} (session {})", first.recorded_at, first.session_id);
        println!("  newest: {} (session {})", last.recorded_at, last.session_id);
    }
    ExitCode::SUCCESS
}
