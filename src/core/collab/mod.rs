//! §6.5/§6.6 external collaborators, plus the ambient metrics
//! collaborator: typed interfaces the core consumes without owning
//! their implementation.

pub mod local_store;
pub mod http_downloader;

pub use local_store::LocalObjectStore;
pub use http_downloader::HttpDownloader;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::ops::DownloadOptions;
use crate::error::CoreResult;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn ensure_bucket(&self, name: &str) -> CoreResult<()>;
    async fn put(&self, bytes: Bytes, bucket: &str, key: &str) -> CoreResult<()>;
    async fn presign_get(&self, bucket: &str, key: &str, ttl_secs: u64) -> CoreResult<String>;
    async fn delete(&self, bucket: &str, key: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Resolve an external source URL into a stored file and a
    /// presigned fetch URL, optionally deduplicating against a prior
    /// download keyed by `(source_url, quality, format, audio_only)`.
    async fn download(
        &self,
        source_url: &str,
        options: &DownloadOptions,
    ) -> CoreResult<(String, String)>;
}

/// Counters the Worker increments at the points named in §4.F step 2
/// ("picked, processing depth") and on completion/failure. No concrete
/// exporter is specified; `NoopMetrics` is the default until one is
/// wired in.
pub trait Metrics: Send + Sync {
    fn job_picked(&self, _worker_id: usize) {}
    fn processing_depth(&self, _depth: usize) {}
    fn job_completed(&self, _elapsed_ms: i64) {}
    fn job_failed(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
