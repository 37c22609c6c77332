use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::error::PositionError;
use super::types::GpsFix;

pub type FixStream = Pin<Box<dyn Stream<Item = Result<GpsFix, PositionError>> + Send>>;

/// Platform location capability. Dropping the returned stream must release
/// whatever handle the provider holds (socket, file, subscription).
pub trait LocationProvider: Send + Sync {
    fn watch(&self) -> FixStream;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionState {
    pub fix: Option<GpsFix>,
    pub error: Option<PositionError>,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

pub struct PositionSource {
    provider: Arc<dyn LocationProvider>,
    state: Arc<watch::Sender<PositionState>>,
    worker: Option<WorkerHandle>,
}

impl PositionSource {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        let (state, _) = watch::channel(PositionState::default());
        Self {
            provider,
            state: Arc::new(state),
            worker: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PositionState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.join.is_finished())
    }

    /// Starts continuous sampling. Calling this while already active does nothing.
    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }

        let stream = self.provider.watch();
        let state = self.state.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_watch(stream, state, stop_rx));

        info!("Position source started");
        self.worker = Some(WorkerHandle { stop_tx, join });
    }

    /// Opens a fresh provider stream if the previous one ended on its own,
    /// for example after the daemon dropped the connection. Returns whether a
    /// restart happened. A stopped source stays stopped.
    pub fn restart_if_ended(&mut self) -> bool {
        match &self.worker {
            Some(worker) if worker.join.is_finished() => {
                info!("Location stream ended, reopening");
                self.worker = None;
                self.start();
                true
            }
            _ => false,
        }
    }

    /// Stops sampling and waits until the provider stream has been dropped.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
            info!("Position source stopped");
        }
    }
}

async fn run_watch(
    mut stream: FixStream,
    state: Arc<watch::Sender<PositionState>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(fix)) => state.send_modify(|s| {
                    s.fix = Some(fix);
                    s.error = None;
                }),
                Some(Err(err)) => {
                    warn!("Position error: {} ({})", err, err.hint());
                    state.send_modify(|s| s.error = Some(err));
                }
                None => {
                    debug!("Location stream ended");
                    break;
                }
            },
            _ = &mut stop_rx => break,
        }
    }
}
