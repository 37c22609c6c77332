mod error;
mod gpsd;
mod replay;
mod source;
mod types;

pub use gpsd::GpsdProvider;
pub use replay::ReplayProvider;
pub use source::{LocationProvider, PositionSource, PositionState};
pub use types::GpsFix;
