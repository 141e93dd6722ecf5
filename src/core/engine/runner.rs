//! §4.A Engine Runner — spawn the media engine, stream its output.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{CoreError, CoreResult};

const STDERR_TAIL_LINES: usize = 100;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub processing_time_ms: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// The handle returned by [`EngineRunner::run`]: a lazy stream of stdout
/// chunks plus a join handle that resolves once the child has exited and
/// every concurrent IO task has been awaited.
pub struct EngineRun {
    pub stdout: ReceiverStream<Bytes>,
    pub done: tokio::task::JoinHandle<CoreResult<ExecutionResult>>,
}

pub struct EngineRunner {
    chunk_size: usize,
}

impl EngineRunner {
    pub fn new(chunk_size: usize) -> Self {
        EngineRunner { chunk_size }
    }

    /// Spawn `engine_path argv... -progress pipe:2` and stream the result.
    ///
    /// `argv` is expected to already end with the output target (e.g.
    /// `pipe:1` for a streamed export, or a concrete path for the
    /// transmuxer). Two trailing flags instructing the engine to emit
    /// progress records on its diagnostic channel are appended here, not
    /// by the compiler.
    ///
    /// `progress_tx` receives 0..=100 percentages on a best-effort basis;
    /// a full channel silently drops updates rather than block the reader.
    pub fn run(
        &self,
        engine_path: &std::path::Path,
        mut argv: Vec<String>,
        stdin_bytes: Option<Vec<u8>>,
        total_duration: Option<f64>,
        progress_tx: Option<mpsc::Sender<f64>>,
    ) -> CoreResult<EngineRun> {
        argv.push("-progress".to_string());
        argv.push("pipe:2".to_string());

        let mut cmd = Command::new(engine_path);
        cmd.args(&argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin_bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        tracing::debug!(?argv, "spawning engine");

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::UpstreamFailure(format!("failed to spawn engine: {e}")))?;

        let start_time = Utc::now();
        let started = Instant::now();

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take().expect("stdout piped");
        let child_stderr = child.stderr.take().expect("stderr piped");

        let stdin_task = tokio::spawn(async move {
            if let (Some(mut stdin), Some(bytes)) = (child_stdin, stdin_bytes) {
                stdin
                    .write_all(&bytes)
                    .await
                    .map_err(|e| format!("stdin write failed: {e}"))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|e| format!("stdin close failed: {e}"))?;
            }
            Ok::<(), String>(())
        });

        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(child_stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(us) = parse_out_time_ms(&line) {
                    let elapsed_s = us / 1_000_000.0;
                    if let Some(total) = total_duration {
                        if total > 0.0 {
                            let pct = (elapsed_s / total * 100.0).clamp(0.0, 100.0);
                            if let Some(tx) = &progress_tx {
                                let _ = tx.try_send(pct);
                            }
                        }
                    }
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let (stdout_tx, stdout_rx) = mpsc::channel::<Bytes>(4);
        let chunk_size = self.chunk_size;
        let stdout_task = tokio::spawn(async move {
            let mut reader = child_stdout;
            let mut buf = vec![0u8; chunk_size];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                if stdout_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
        });

        let done = tokio::spawn(async move {
            let status = child
                .wait()
                .await
                .map_err(|e| CoreError::UpstreamFailure(format!("engine wait failed: {e}")))?;
            let _ = stdout_task.await;
            let stdin_result = stdin_task.await;
            let stderr_tail = stderr_task.await.unwrap_or_default();

            if let Ok(Err(stdin_err)) = stdin_result {
                return Err(CoreError::UpstreamFailure(stdin_err));
            }

            let end_time = Utc::now();
            if !status.success() {
                return Err(CoreError::EngineFailure {
                    stderr_tail,
                });
            }

            Ok(ExecutionResult {
                processing_time_ms: started.elapsed().as_millis() as i64,
                start_time,
                end_time,
            })
        });

        Ok(EngineRun {
            stdout: ReceiverStream::new(stdout_rx),
            done,
        })
    }
}

fn parse_out_time_ms(line: &str) -> Option<f64> {
    line.strip_prefix("out_time_ms=")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_out_time_ms_record() {
        assert_eq!(parse_out_time_ms("out_time_ms=1500000"), Some(1_500_000.0));
        assert_eq!(parse_out_time_ms("frame=10"), None);
    }
}
