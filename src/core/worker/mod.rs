//! §4.F/§4.G Worker and Worker Pool.

mod pool;
mod worker;

pub use pool::WorkerPool;
pub use worker::{Worker, WorkerConfig};
