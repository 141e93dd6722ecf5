//! The media-editing job platform core: compiler, engine
//! collaborators, job store, worker pool, planner and progress stream.
//! Everything here is transport-agnostic; `src/http` wires it to axum.

pub mod collab;
pub mod compiler;
pub mod dispatch;
pub mod engine;
pub mod models;
pub mod ops;
pub mod planner;
pub mod progress_stream;
pub mod store;
pub mod worker;
