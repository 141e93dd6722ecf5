//! §4.A/§4.B/§4.D: the three collaborators that actually talk to the
//! media engine subprocess.

pub mod prober;
pub mod runner;
pub mod transmux;

pub use prober::{MediaProber, VideoInfo};
pub use runner::{EngineRun, EngineRunner, ExecutionResult};
pub use transmux::DeliveryTransmuxer;
