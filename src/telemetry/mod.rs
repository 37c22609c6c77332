mod replay;
mod session;

pub use replay::{QueueReplayer, DEFAULT_BATCH_SIZE};
pub use session::{SessionParams, TelemetryContext, TelemetryLoop, DEFAULT_SAMPLE_INTERVAL};
