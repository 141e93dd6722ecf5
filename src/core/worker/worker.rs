//! §4.F Worker — dequeue, execute, upload, transition.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::collab::{Downloader, Metrics, ObjectStore};
use crate::core::compiler::state::BuilderState;
use crate::core::compiler::{CompiledInvocation, FilterGraphCompiler};
use crate::core::dispatch;
use crate::core::engine::{DeliveryTransmuxer, EngineRunner, MediaProber};
use crate::core::models::{Job, JobOutput, JobStatus};
use crate::core::ops::OperationRecord;
use crate::core::store::JobStore;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: usize,
    pub max_retries: i16,
    pub poll_interval: Duration,
    pub primary_bucket: String,
    pub presign_ttl: Duration,
}

pub struct Worker {
    config: WorkerConfig,
    engine_path: std::path::PathBuf,
    store: Arc<dyn JobStore>,
    compiler: Arc<FilterGraphCompiler>,
    prober: Arc<MediaProber>,
    runner: Arc<EngineRunner>,
    transmuxer: Arc<DeliveryTransmuxer>,
    object_store: Arc<dyn ObjectStore>,
    downloader: Arc<dyn Downloader>,
    metrics: Arc<dyn Metrics>,
    current: Mutex<Option<(i64, CancellationToken)>>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkerConfig,
        engine_path: std::path::PathBuf,
        store: Arc<dyn JobStore>,
        compiler: Arc<FilterGraphCompiler>,
        prober: Arc<MediaProber>,
        runner: Arc<EngineRunner>,
        transmuxer: Arc<DeliveryTransmuxer>,
        object_store: Arc<dyn ObjectStore>,
        downloader: Arc<dyn Downloader>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Worker {
            config,
            engine_path,
            store,
            compiler,
            prober,
            runner,
            transmuxer,
            object_store,
            downloader,
            metrics,
            current: Mutex::new(None),
        }
    }

    pub fn current_job_id(&self) -> Option<i64> {
        self.current.lock().unwrap().as_ref().map(|(id, _)| *id)
    }

    /// Cancel the in-flight job if it matches `job_id`. Returns whether
    /// this worker was the one holding it (§4.G `cancel`).
    pub fn cancel_if(&self, job_id: i64) -> bool {
        let guard = self.current.lock().unwrap();
        match guard.as_ref() {
            Some((id, token)) if *id == job_id => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Main loop: dequeue -> execute -> upload -> transition, repeated
    /// until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.store.dequeue(self.config.max_retries).await {
                Ok(Some(dequeued)) => self.process(dequeued.job, dequeued.previous_output).await,
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    tracing::error!(error = %e, "dequeue failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, job: Job, previous_output: Option<serde_json::Value>) {
        let token = CancellationToken::new();
        *self.current.lock().unwrap() = Some((job.id, token.clone()));
        self.metrics.job_picked(self.config.id);

        tracing::debug!(job_id = job.id, uid = %job.uid, "picked job");

        let result = tokio::select! {
            r = self.execute(&job, previous_output) => r,
            _ = token.cancelled() => Err(CoreError::Cancelled),
        };

        match result {
            Ok(output) => {
                let output_json = serde_json::to_value(&output).unwrap_or_default();
                if let Err(e) = self.store.complete(job.id, output_json).await {
                    tracing::warn!(job_id = job.id, error = %e, "failed to mark job completed");
                }
                self.metrics.job_completed(0);
            }
            Err(CoreError::Cancelled) => {
                tracing::info!(job_id = job.id, "job cancelled mid-flight");
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "job failed");
                let _ = self.store.error(job.id, &e.to_string()).await;
                self.metrics.job_failed();
            }
        }

        *self.current.lock().unwrap() = None;
    }

    async fn execute(
        &self,
        job: &Job,
        previous_output: Option<serde_json::Value>,
    ) -> CoreResult<JobOutput> {
        let mut input = if job.input.is_empty() {
            self.resolve_chained_input(previous_output).await?
        } else {
            job.input.clone()
        };

        let mut remaining_ops: Vec<OperationRecord> = Vec::with_capacity(job.action.len());
        for op in &job.action {
            if let OperationRecord::ExternalDownload(options) = op {
                let (_, presigned_url) = self
                    .downloader
                    .download(&input, options)
                    .await
                    .map_err(|e| CoreError::UpstreamFailure(e.to_string()))?;
                input = presigned_url;
            } else {
                remaining_ops.push(op.clone());
            }
        }

        if remaining_ops.is_empty() {
            return Err(CoreError::invalid("no operations remain after download resolution"));
        }

        let mut state = BuilderState::new();
        for op in &remaining_ops {
            dispatch::apply(&mut state, op)?;
        }

        let work_dir = self.compiler.work_dir().to_path_buf();
        tokio::fs::create_dir_all(&work_dir).await.map_err(CoreError::Io)?;
        let token = Uuid::new_v4().to_string();

        let info = self.prober.probe(&input).await;
        if let Some(err) = &info.error {
            return Err(CoreError::ProbeFailure(err.clone()));
        }

        let invocation = self
            .compiler
            .compile(&self.prober, &input, &info, &state, &token)
            .await?;

        let bytes = self.run_invocation(job, &invocation, info.duration).await?;
        self.cleanup_scratch(&invocation).await;

        let (bytes, output_ext) = if let Some(platform_opts) = &state.convert_to_platform {
            let transmuxed = self.transmuxer.transmux(&bytes, platform_opts, &token).await?;
            (transmuxed, "mp4".to_string())
        } else {
            (bytes, invocation.output_ext.clone())
        };
        let filename = derive_output_filename(&input, job.uid, job.output_version, &output_ext);

        self.object_store
            .ensure_bucket(&self.config.primary_bucket)
            .await
            .map_err(|e| CoreError::UpstreamFailure(e.to_string()))?;
        self.store
            .create(
                "files",
                serde_json::json!({
                    "name": filename,
                    "bucketname": self.config.primary_bucket,
                    "filetype": output_ext,
                }),
            )
            .await?;
        self.object_store
            .put(Bytes::from(bytes), &self.config.primary_bucket, &filename)
            .await
            .map_err(|e| CoreError::UpstreamFailure(e.to_string()))?;

        Ok(JobOutput {
            filename,
            video_format: output_ext.clone(),
            audio_format: state
                .transcode
                .as_ref()
                .map(|t| t.audio_codec.clone())
                .unwrap_or_else(|| "aac".to_string()),
            audio_bitrate: state
                .transcode
                .as_ref()
                .and_then(|t| t.audio_bitrate.clone())
                .unwrap_or_else(|| "128k".to_string()),
        })
    }

    async fn resolve_chained_input(
        &self,
        previous_output: Option<serde_json::Value>,
    ) -> CoreResult<String> {
        let output: JobOutput = previous_output
            .ok_or_else(|| CoreError::invalid("empty input with no predecessor output"))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| CoreError::invalid(format!("corrupt predecessor output: {e}")))
            })?;
        self.object_store
            .presign_get(
                &self.config.primary_bucket,
                &output.filename,
                self.config.presign_ttl.as_secs(),
            )
            .await
            .map_err(|e| CoreError::UpstreamFailure(e.to_string()))
    }

    async fn run_invocation(
        &self,
        job: &Job,
        invocation: &CompiledInvocation,
        total_duration: Option<f64>,
    ) -> CoreResult<Vec<u8>> {
        let (progress_tx, mut progress_rx) = mpsc::channel::<f64>(16);

        let store = self.store.clone();
        let job_id = job.id;
        let progress_task = tokio::spawn(async move {
            while let Some(pct) = progress_rx.recv().await {
                let clamped = pct.round().clamp(0.0, 100.0) as i16;
                let _ = store
                    .update(
                        "jobs",
                        serde_json::json!({ "progress": clamped }),
                        &[crate::core::store::Filter {
                            column: "id",
                            value: serde_json::json!(job_id),
                        }],
                    )
                    .await;
            }
        });

        let run = self.runner.run(
            &self.engine_path(),
            invocation.argv.clone(),
            invocation.stdin.clone(),
            total_duration,
            Some(progress_tx),
        )?;

        let mut buf = BytesMut::new();
        let mut stdout = run.stdout;
        while let Some(chunk) = stdout.next().await {
            buf.extend_from_slice(&chunk);
        }

        let exec_result = run
            .done
            .await
            .map_err(|e| CoreError::UpstreamFailure(format!("runner task panicked: {e}")))??;
        let _ = exec_result;
        let _ = progress_task.await;

        Ok(buf.to_vec())
    }

    async fn cleanup_scratch(&self, invocation: &CompiledInvocation) {
        for path in &invocation.scratch_files {
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    fn engine_path(&self) -> std::path::PathBuf {
        self.engine_path.clone()
    }
}

/// Derive the output artifact filename (§4.F step 5): the URL's
/// basename without extension, `_<audio|output>_<uid>_<version>.<ext>`.
/// Unknown extensions are rejected in favour of `mp4`.
pub fn derive_output_filename(source: &str, uid: Uuid, output_version: i32, ext: &str) -> String {
    let ext = if crate::core::ops::is_valid_output_extension(ext) {
        ext.to_ascii_lowercase()
    } else {
        "mp4".to_string()
    };
    let basename = Path::new(source.split('?').next().unwrap_or(source))
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("clip");
    let kind = if ext == "mp3" || ext == "m4a" || ext == "wav" || ext == "flac" {
        "audio"
    } else {
        "output"
    };
    format!("{basename}_{kind}_{uid}_{output_version}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_output_filename_rejects_unknown_extension() {
        let uid = Uuid::nil();
        let name = derive_output_filename("https://example.com/clip.mov", uid, 0, "exe");
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn derive_output_filename_uses_audio_kind_for_audio_ext() {
        let uid = Uuid::nil();
        let name = derive_output_filename("https://example.com/clip.mp4", uid, 2, "mp3");
        assert!(name.contains("_audio_"));
        assert!(name.ends_with(".mp3"));
    }
}
