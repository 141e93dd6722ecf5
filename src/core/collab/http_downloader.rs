//! `Downloader` (§6.6): fetches an external URL, stores it through the
//! `ObjectStore`, and de-dupes against the `downloads` table keyed by
//! `(external_url, quality, format, audio_only)`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

use super::{Downloader, ObjectStore};
use crate::core::ops::DownloadOptions;
use crate::core::store::{Filter, FilterCondition, JobStore};
use crate::error::{CoreError, CoreResult};

pub struct HttpDownloader {
    client: reqwest::Client,
    object_store: Arc<dyn ObjectStore>,
    store: Arc<dyn JobStore>,
    bucket: String,
    presign_ttl_secs: u64,
    /// Host rewrite applied to the presigned URL handed back to the
    /// worker, e.g. rewriting an internal object-store hostname to the
    /// alias the worker's network namespace actually resolves.
    rewrite_host: Option<(String, String)>,
}

impl HttpDownloader {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        store: Arc<dyn JobStore>,
        bucket: impl Into<String>,
        presign_ttl_secs: u64,
    ) -> Self {
        HttpDownloader {
            client: reqwest::Client::new(),
            object_store,
            store,
            bucket: bucket.into(),
            presign_ttl_secs,
            rewrite_host: None,
        }
    }

    pub fn with_host_rewrite(mut self, rewrite: Option<(String, String)>) -> Self {
        self.rewrite_host = rewrite;
        self
    }

    fn apply_host_rewrite(&self, url: String) -> String {
        match &self.rewrite_host {
            Some((from, to)) => url.replace(from.as_str(), to.as_str()),
            None => url,
        }
    }

    fn dedup_filters(source_url: &str, options: &DownloadOptions) -> [Filter; 4] {
        [
            Filter { column: "external_url", value: Value::String(source_url.to_string()) },
            Filter { column: "quality", value: Value::String(options.quality.clone()) },
            Filter {
                column: "format",
                value: options.format.clone().map(Value::String).unwrap_or(Value::Null),
            },
            Filter { column: "audio_only", value: Value::Bool(options.audio_only) },
        ]
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        source_url: &str,
        options: &DownloadOptions,
    ) -> CoreResult<(String, String)> {
        let filters = Self::dedup_filters(source_url, options);
        let existing = self
            .store
            .read("downloads", &filters, FilterCondition::And, 1, 0)
            .await?;

        if let Some(row) = existing.into_iter().next() {
            let filename = row
                .get("filename")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::invalid("downloads row missing filename"))?
                .to_string();
            let bucketname = row
                .get("bucketname")
                .and_then(Value::as_str)
                .unwrap_or(&self.bucket);
            let url = self
                .object_store
                .presign_get(bucketname, &filename, self.presign_ttl_secs)
                .await?;
            return Ok((filename, self.apply_host_rewrite(url)));
        }

        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamFailure(format!("download request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::UpstreamFailure(format!(
                "download returned status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::UpstreamFailure(format!("download body read failed: {e}")))?;

        let ext = guess_extension(source_url, options);
        let filename = format!("{}.{}", Uuid::new_v4(), ext);

        self.object_store.ensure_bucket(&self.bucket).await?;
        self.object_store.put(Bytes::from(bytes), &self.bucket, &filename).await?;

        self.store
            .create(
                "downloads",
                serde_json::json!({
                    "external_url": source_url,
                    "quality": options.quality,
                    "format": options.format,
                    "audio_only": options.audio_only,
                    "filename": filename,
                    "bucketname": self.bucket,
                }),
            )
            .await?;

        let url = self
            .object_store
            .presign_get(&self.bucket, &filename, self.presign_ttl_secs)
            .await?;
        Ok((filename, self.apply_host_rewrite(url)))
    }
}

fn guess_extension(source_url: &str, options: &DownloadOptions) -> String {
    if let Some(format) = &options.format {
        return format.clone();
    }
    if options.audio_only {
        return "m4a".to_string();
    }
    std::path::Path::new(source_url.split('?').next().unwrap_or(source_url))
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| crate::core::ops::is_valid_output_extension(ext))
        .unwrap_or_else(|| "mp4".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_extension_prefers_explicit_format() {
        let options = DownloadOptions { quality: "best".to_string(), format: Some("webm".to_string()), audio_only: false };
        assert_eq!(guess_extension("https://example.com/v", &options), "webm");
    }

    #[test]
    fn guess_extension_falls_back_to_audio_for_audio_only() {
        let options = DownloadOptions { quality: "best".to_string(), format: None, audio_only: true };
        assert_eq!(guess_extension("https://example.com/v", &options), "m4a");
    }
}
