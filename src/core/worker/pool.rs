//! §4.G Worker Pool — fixed-cardinality pool with cooperative
//! start/stop and cancellation dispatch by current job id.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::Worker;

const STOP_RETRIES: usize = 5;
const STOP_RETRY_WAIT: Duration = Duration::from_millis(200);

pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    shutdown: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Arc<Worker>>) -> Self {
        WorkerPool {
            workers,
            shutdown: CancellationToken::new(),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn `N` worker tasks.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        for worker in &self.workers {
            let worker = worker.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run(shutdown).await;
            }));
        }
    }

    /// Cancel each worker's task and await termination, retrying up to
    /// `STOP_RETRIES` times per worker before giving up (§4.G).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let mut attempt = 0;
            let mut handle = handle;
            loop {
                attempt += 1;
                match tokio::time::timeout(STOP_RETRY_WAIT, &mut handle).await {
                    Ok(_) => break,
                    Err(_) if attempt >= STOP_RETRIES => {
                        tracing::warn!("worker did not stop after {STOP_RETRIES} attempts");
                        break;
                    }
                    Err(_) => continue,
                }
            }
        }
    }

    /// Locate the worker whose `current_job_id` matches and cancel its
    /// task. No-op if no worker holds it — the row update already
    /// suffices for jobs that were never picked up.
    pub fn cancel(&self, job_id: i64) {
        for worker in &self.workers {
            if worker.cancel_if(job_id) {
                return;
            }
        }
    }
}
