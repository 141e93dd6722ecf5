//! §4.I Progress Stream — on-demand poll loop over the job store for a
//! given execution uid, emitting an event whenever a row's
//! `updated_at` advances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::models::Job;
use super::store::{Filter, FilterCondition, JobStore};

/// Default poll period; §4.I allows any value in `[1, 2]` seconds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job: Job,
}

pub struct ProgressStream {
    store: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl ProgressStream {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        ProgressStream { store, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(store: Arc<dyn JobStore>, poll_interval: Duration) -> Self {
        ProgressStream { store, poll_interval }
    }

    /// Start polling `jobs` filtered by `uid`. The returned stream ends
    /// as soon as the caller drops it — the background task notices via
    /// a failed `send` and exits, so no poll loop outlives its client.
    pub fn watch(&self, uid: Uuid) -> ReceiverStream<JobUpdate> {
        let (tx, rx) = mpsc::channel(32);
        let store = self.store.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last_seen: HashMap<i64, DateTime<Utc>> = HashMap::new();
            loop {
                let filters = [Filter { column: "uid", value: serde_json::json!(uid) }];
                let rows = match store.read("jobs", &filters, FilterCondition::And, 1000, 0).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!(error = %e, %uid, "progress stream read failed");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };

                for row in rows {
                    let job: Job = match serde_json::from_value(row) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed job row in progress stream");
                            continue;
                        }
                    };
                    let changed = last_seen.get(&job.id).map(|t| *t != job.updated_at).unwrap_or(true);
                    if changed {
                        last_seen.insert(job.id, job.updated_at);
                        if tx.send(JobUpdate { job }).await.is_err() {
                            return;
                        }
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::JobStatus;
    use crate::core::store::Dequeued;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::Value;
    use std::sync::Mutex;

    struct FakeStore {
        rows: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl JobStore for FakeStore {
        async fn create(&self, _table: &str, _record: Value) -> crate::error::CoreResult<i64> {
            Ok(1)
        }
        async fn create_many(&self, _table: &str, _records: Vec<Value>) -> crate::error::CoreResult<Vec<i64>> {
            Ok(vec![])
        }
        async fn read(
            &self,
            _table: &str,
            _filters: &[Filter],
            _condition: FilterCondition,
            _limit: i64,
            _last_id: i64,
        ) -> crate::error::CoreResult<Vec<Value>> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn update(&self, _table: &str, _set_values: Value, _filters: &[Filter]) -> crate::error::CoreResult<u64> {
            Ok(0)
        }
        async fn delete(&self, _table: &str, _filters: &[Filter]) -> crate::error::CoreResult<u64> {
            Ok(0)
        }
        async fn dequeue(&self, _max_retries: i16) -> crate::error::CoreResult<Option<Dequeued>> {
            Ok(None)
        }
        async fn cancel(&self, _job_id: i64) -> crate::error::CoreResult<()> {
            Ok(())
        }
        async fn complete(&self, _job_id: i64, _output: Value) -> crate::error::CoreResult<()> {
            Ok(())
        }
        async fn error(&self, _job_id: i64, _err_text: &str) -> crate::error::CoreResult<()> {
            Ok(())
        }
        async fn retry(&self, _job_id: i64) -> crate::error::CoreResult<()> {
            Ok(())
        }
        async fn insert_jobs_and_execution(
            &self,
            _workflow_id: i64,
            _execution_uid: Uuid,
            _jobs: Vec<Job>,
        ) -> crate::error::CoreResult<Vec<i64>> {
            Ok(vec![])
        }
    }

    fn job_row(id: i64, uid: Uuid, updated_at: DateTime<Utc>) -> Value {
        serde_json::json!({
            "id": id,
            "uid": uid,
            "input": "",
            "action": [],
            "status": "queued",
            "output_version": 0,
            "output": null,
            "retries": 0,
            "error": null,
            "progress": 0,
            "created_at": updated_at,
            "updated_at": updated_at,
        })
    }

    #[tokio::test]
    async fn emits_only_on_updated_at_change() {
        let uid = Uuid::new_v4();
        let t0 = Utc::now();
        let store = Arc::new(FakeStore { rows: Mutex::new(vec![job_row(1, uid, t0)]) });
        let stream = ProgressStream::with_poll_interval(store.clone(), Duration::from_millis(20));
        let mut rx = stream.watch(uid);

        let first = rx.next().await.unwrap();
        assert_eq!(first.job.status, JobStatus::Queued);

        // No change yet: advancing time without bumping updated_at must
        // not emit a second event within one poll tick.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let t1 = t0 + chrono::Duration::seconds(1);
        *store.rows.lock().unwrap() = vec![job_row(1, uid, t1)];

        let second = tokio::time::timeout(Duration::from_secs(1), rx.next()).await.unwrap().unwrap();
        assert_eq!(second.job.updated_at, t1);
    }
}
