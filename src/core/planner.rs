//! §4.H Workflow Planner — expand a stored workflow into a chain of
//! jobs sharing one execution id, and persist them atomically.

use std::sync::Arc;

use uuid::Uuid;

use super::dispatch;
use super::models::{Job, JobStatus, Workflow};
use super::store::JobStore;
use crate::error::CoreResult;

pub struct WorkflowPlanner {
    store: Arc<dyn JobStore>,
}

impl WorkflowPlanner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        WorkflowPlanner { store }
    }

    /// Expand `workflow` into one job per step, all sharing a freshly
    /// allocated execution uid, and insert them with a
    /// `workflow_executions` row in a single atomic call (§4.H).
    pub async fn plan_and_enqueue(
        &self,
        workflow: &Workflow,
        media_url: &str,
    ) -> CoreResult<Uuid> {
        let execution_uid = Uuid::new_v4();
        let now = chrono::Utc::now();

        let mut jobs = Vec::with_capacity(workflow.steps.len());
        for (step_index, step) in workflow.steps.iter().enumerate() {
            dispatch::validate_recipe(step)?;

            jobs.push(Job {
                id: 0,
                uid: execution_uid,
                input: if step_index == 0 { media_url.to_string() } else { String::new() },
                action: step.clone(),
                status: JobStatus::Queued,
                output_version: step_index as i32,
                output: None,
                retries: 0,
                error: None,
                progress: 0,
                created_at: now,
                updated_at: now,
            });
        }

        self.store
            .insert_jobs_and_execution(workflow.id, execution_uid, jobs)
            .await?;

        Ok(execution_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ops::{OperationRecord, TrimPayload};
    use crate::core::store::Dequeued;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<(i64, Uuid, usize)>>,
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn create(&self, _table: &str, _record: Value) -> CoreResult<i64> {
            Ok(1)
        }
        async fn create_many(&self, _table: &str, _records: Vec<Value>) -> CoreResult<Vec<i64>> {
            Ok(vec![])
        }
        async fn read(
            &self,
            _table: &str,
            _filters: &[super::super::store::Filter],
            _condition: super::super::store::FilterCondition,
            _limit: i64,
            _last_id: i64,
        ) -> CoreResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn update(
            &self,
            _table: &str,
            _set_values: Value,
            _filters: &[super::super::store::Filter],
        ) -> CoreResult<u64> {
            Ok(0)
        }
        async fn delete(&self, _table: &str, _filters: &[super::super::store::Filter]) -> CoreResult<u64> {
            Ok(0)
        }
        async fn dequeue(&self, _max_retries: i16) -> CoreResult<Option<Dequeued>> {
            Ok(None)
        }
        async fn cancel(&self, _job_id: i64) -> CoreResult<()> {
            Ok(())
        }
        async fn complete(&self, _job_id: i64, _output: Value) -> CoreResult<()> {
            Ok(())
        }
        async fn error(&self, _job_id: i64, _err_text: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn retry(&self, _job_id: i64) -> CoreResult<()> {
            Ok(())
        }
        async fn insert_jobs_and_execution(
            &self,
            workflow_id: i64,
            execution_uid: Uuid,
            jobs: Vec<Job>,
        ) -> CoreResult<Vec<i64>> {
            self.inserted
                .lock()
                .unwrap()
                .push((workflow_id, execution_uid, jobs.len()));
            Ok((1..=jobs.len() as i64).collect())
        }
    }

    fn workflow_with_two_steps() -> Workflow {
        let now = chrono::Utc::now();
        Workflow {
            id: 7,
            name: "trim-twice".to_string(),
            search: None,
            steps: vec![
                vec![OperationRecord::Trim(TrimPayload {
                    start_sec: 0,
                    end_sec: 5,
                    duration: None,
                })],
                vec![OperationRecord::Trim(TrimPayload {
                    start_sec: 0,
                    end_sec: 2,
                    duration: None,
                })],
            ],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn plan_assigns_shared_uid_and_monotonic_versions() {
        let store = Arc::new(RecordingStore::default());
        let planner = WorkflowPlanner::new(store.clone());
        let workflow = workflow_with_two_steps();

        let uid = planner.plan_and_enqueue(&workflow, "https://example.com/in.mp4").await.unwrap();

        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0], (7, uid, 2));
    }

    #[tokio::test]
    async fn plan_rejects_invalid_step() {
        let store = Arc::new(RecordingStore::default());
        let planner = WorkflowPlanner::new(store);
        let mut workflow = workflow_with_two_steps();
        workflow.steps.push(vec![OperationRecord::Concat(
            crate::core::ops::ConcatPayload { input_paths: vec!["only-one.mp4".to_string()] },
        )]);

        let result = planner.plan_and_enqueue(&workflow, "https://example.com/in.mp4").await;
        assert!(result.is_err());
    }
}
