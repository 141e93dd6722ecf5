//! §4.D Delivery Transmuxer — post-process a streamable intermediate
//! into a seekable delivery container.

use std::path::PathBuf;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::ops::ConvertToPlatformOptions;
use crate::error::{CoreError, CoreResult};

const TRANSMUX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct DeliveryTransmuxer {
    engine_path: PathBuf,
    scratch_dir: PathBuf,
}

impl DeliveryTransmuxer {
    pub fn new(engine_path: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        DeliveryTransmuxer {
            engine_path: engine_path.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Write `intermediate` to a scratch file, invoke the engine to
    /// transmux it to a faststart mp4, return the resulting bytes, and
    /// remove the scratch directory on every exit path.
    pub async fn transmux(
        &self,
        intermediate: &[u8],
        opts: &ConvertToPlatformOptions,
        token: &str,
    ) -> CoreResult<Vec<u8>> {
        let job_dir = self.scratch_dir.join(format!("transmux_{token}"));
        fs::create_dir_all(&job_dir).await.map_err(CoreError::Io)?;
        let result = self.transmux_inner(intermediate, opts, &job_dir).await;
        let _ = fs::remove_dir_all(&job_dir).await;
        result
    }

    async fn transmux_inner(
        &self,
        intermediate: &[u8],
        opts: &ConvertToPlatformOptions,
        job_dir: &std::path::Path,
    ) -> CoreResult<Vec<u8>> {
        let in_path = job_dir.join("intermediate.mkv");
        let out_path = job_dir.join("scratch.mp4");

        let mut f = fs::File::create(&in_path).await.map_err(CoreError::Io)?;
        f.write_all(intermediate).await.map_err(CoreError::Io)?;
        f.flush().await.map_err(CoreError::Io)?;
        drop(f);

        let argv = crate::core::compiler::args::transmux_args(
            &in_path.to_string_lossy(),
            &out_path.to_string_lossy(),
            opts,
        );

        let run = Command::new(&self.engine_path).args(&argv).output();
        let output = tokio::time::timeout(TRANSMUX_TIMEOUT, run)
            .await
            .map_err(|_| CoreError::EngineFailure {
                stderr_tail: "transmux timed out after 60 minutes".to_string(),
            })?
            .map_err(|e| CoreError::UpstreamFailure(format!("failed to spawn engine: {e}")))?;

        if !output.status.success() {
            let tail: String = String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .take(100)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(CoreError::EngineFailure { stderr_tail: tail });
        }

        fs::read(&out_path).await.map_err(CoreError::Io)
    }
}
