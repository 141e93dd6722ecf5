//! §4.E Job Store Adapter — the bounded set of SQL operations the queue
//! needs, backed by Postgres via `sqlx`.

mod postgres;
mod schema;

pub use postgres::PostgresStore;
pub use schema::SCHEMA_SQL;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::core::models::Job;
use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCondition {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column: &'static str,
    pub value: Value,
}

/// A job pulled off the queue plus its predecessor's output (the DAG
/// chaining input for `output_version > 0`), both produced by the same
/// atomic statement (§4.E `dequeue`).
#[derive(Debug, Clone)]
pub struct Dequeued {
    pub job: Job,
    pub previous_output: Option<Value>,
}

/// The operations the Worker and Planner need from the relational
/// store. Kept narrow and table-name-parameterised rather than
/// per-entity, matching the source's generic `db` module
/// (`modules/db.py`) — §4.E lists these as the complete surface.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, table: &str, record: Value) -> CoreResult<i64>;
    async fn create_many(&self, table: &str, records: Vec<Value>) -> CoreResult<Vec<i64>>;
    async fn read(
        &self,
        table: &str,
        filters: &[Filter],
        condition: FilterCondition,
        limit: i64,
        last_id: i64,
    ) -> CoreResult<Vec<Value>>;
    async fn update(
        &self,
        table: &str,
        set_values: Value,
        filters: &[Filter],
    ) -> CoreResult<u64>;
    async fn delete(&self, table: &str, filters: &[Filter]) -> CoreResult<u64>;

    /// Atomic select-for-update-skip-locked of the oldest eligible
    /// QUEUED job, transitioned to PROCESSING in the same statement.
    async fn dequeue(&self, max_retries: i16) -> CoreResult<Option<Dequeued>>;

    async fn cancel(&self, job_id: i64) -> CoreResult<()>;
    async fn complete(&self, job_id: i64, output: Value) -> CoreResult<()>;
    async fn error(&self, job_id: i64, err_text: &str) -> CoreResult<()>;

    /// Reset an ERROR/CANCELLED job back to QUEUED (§8 scenario 9).
    async fn retry(&self, job_id: i64) -> CoreResult<()>;

    async fn insert_jobs_and_execution(
        &self,
        workflow_id: i64,
        execution_uid: Uuid,
        jobs: Vec<Job>,
    ) -> CoreResult<Vec<i64>>;
}
