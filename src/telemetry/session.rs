use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::replay::QueueReplayer;
use crate::position::PositionState;
use crate::storage::{PositionQueue, QueuedPosition};
use crate::transport::{PositionUpdate, TransportClient, TransportConfig, TransportEvent};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a session needs, built once by the caller.
pub struct TelemetryContext {
    pub queue: Arc<PositionQueue>,
    pub replayer: Arc<QueueReplayer>,
    pub positions: watch::Receiver<PositionState>,
    pub ws_url: String,
    pub transport: TransportConfig,
    pub sample_interval: Duration,
    pub room_scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub session_id: String,
    pub course_id: String,
    pub token: String,
}

impl SessionParams {
    fn is_complete(&self) -> bool {
        !self.session_id.is_empty() && !self.course_id.is_empty() && !self.token.is_empty()
    }

    fn same_session(&self, other: &SessionParams) -> bool {
        self.session_id == other.session_id && self.course_id == other.course_id
    }
}

enum Command {
    RefreshAuth(String),
}

#[derive(Debug)]
struct WorkerHandle {
    params: SessionParams,
    stop_tx: oneshot::Sender<()>,
    commands: mpsc::UnboundedSender<Command>,
    join: JoinHandle<()>,
}

/// Samples the latest fix on a fixed interval, persists every sample and
/// streams it live while the realtime connection is up.
///
/// One session runs at a time. Its timer and connection belong to the
/// session worker and are released before the next session starts.
pub struct TelemetryLoop {
    ctx: Arc<TelemetryContext>,
    worker: Option<WorkerHandle>,
}

impl TelemetryLoop {
    pub fn new(ctx: TelemetryContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            worker: None,
        }
    }

    pub fn session(&self) -> Option<&SessionParams> {
        self.worker.as_ref().map(|w| &w.params)
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.join.is_finished())
    }

    /// Does nothing unless session id, course id and token are all present.
    /// Restarting the running session with only a new token refreshes the
    /// credential in place.
    pub async fn start_session(&mut self, params: SessionParams) {
        if !params.is_complete() {
            debug!("Incomplete session parameters, telemetry not started");
            return;
        }

        if let Some(worker) = &self.worker {
            if worker.params.same_session(&params) {
                if worker.params.token != params.token {
                    self.refresh_auth(&params.token);
                }
                return;
            }
        }

        self.end_session().await;

        info!(
            "Starting telemetry for session {} on course {}",
            params.session_id, params.course_id
        );
        let (stop_tx, stop_rx) = oneshot::channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(run_session(
            self.ctx.clone(),
            params.clone(),
            commands_rx,
            stop_rx,
        ));
        self.worker = Some(WorkerHandle {
            params,
            stop_tx,
            commands,
            join,
        });
    }

    /// Hands a new credential to the open connection without reconnecting.
    pub fn refresh_auth(&mut self, token: &str) {
        if let Some(worker) = &mut self.worker {
            worker.params.token = token.to_string();
            let _ = worker.commands.send(Command::RefreshAuth(token.to_string()));
        }
    }

    /// Stops the timer, leaves the room and destroys the connection.
    pub async fn end_session(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
            info!("Telemetry session {} ended", worker.params.session_id);
        }
    }
}

async fn run_session(
    ctx: Arc<TelemetryContext>,
    params: SessionParams,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut transport = TransportClient::new(ctx.transport.clone());
    let mut events = transport.subscribe();
    transport.connect(&ctx.ws_url, &params.token).await;

    // created on the first connect and kept across disconnects
    let mut ticker: Option<Interval> = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TransportEvent::Connected) => {
                    transport.join_room(&ctx.room_scope, &params.course_id);
                    if ticker.is_none() {
                        ticker = Some(sample_timer(ctx.sample_interval));
                    }
                    spawn_replay(ctx.replayer.clone());
                }
                Ok(TransportEvent::Disconnected { reason }) => {
                    info!("Offline ({}), samples are queued until reconnect", reason);
                }
                Ok(TransportEvent::Error { message }) => warn!("Realtime error: {}", message),
                Ok(TransportEvent::AuthRefreshed) => debug!("Realtime credential accepted"),
                Ok(TransportEvent::Broadcast(_)) => {}
                Err(RecvError::Lagged(n)) => debug!("Missed {} transport events", n),
                Err(RecvError::Closed) => break,
            },
            _ = next_tick(&mut ticker) => sample(&ctx, &params, &transport).await,
            command = commands.recv() => match command {
                Some(Command::RefreshAuth(token)) => transport.refresh_auth(&token),
                None => break,
            },
            _ = &mut stop_rx => break,
        }
    }

    transport.leave_room(&ctx.room_scope, &params.course_id);
    transport.destroy().await;
}

fn sample_timer(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn spawn_replay(replayer: Arc<QueueReplayer>) {
    tokio::spawn(async move {
        if let Some(Err(e)) = replayer.replay().await {
            if e.is_session_expired() {
                warn!("Queue replay stopped: session expired");
            }
        }
    });
}

async fn sample(ctx: &TelemetryContext, params: &SessionParams, transport: &TransportClient) {
    let latest = ctx.positions.borrow().fix;
    let Some(fix) = latest else {
        debug!("No fix yet, skipping sample");
        return;
    };
    let recorded_at = Utc::now();

    ctx.queue
        .enqueue(QueuedPosition {
            session_id: params.session_id.clone(),
            lat: fix.lat,
            lng: fix.lng,
            accuracy: fix.accuracy,
            recorded_at,
        })
        .await;

    if transport.is_connected() {
        transport.send_position(PositionUpdate {
            session_id: params.session_id.clone(),
            course_id: params.course_id.clone(),
            lat: fix.lat,
            lng: fix.lng,
            accuracy: fix.accuracy,
            recorded_at,
        });
    }
}
