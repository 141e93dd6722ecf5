//! Asynchronous media-editing job platform: compiles declarative edit
//! recipes into FFmpeg invocations and runs them on a durable,
//! Postgres-backed worker pool.

pub mod config;
pub mod core;
pub mod error;
pub mod http;
