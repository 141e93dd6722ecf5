use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row};
use uuid::Uuid;

use crate::core::models::{Job, JobOutput, JobStatus};
use crate::error::{CoreError, CoreResult};

use super::{Dequeued, Filter, FilterCondition, JobStore};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresStore { pool }
    }

    pub async fn run_migrations(&self) -> CoreResult<()> {
        sqlx::raw_sql(super::SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Store)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_job(row: &PgRow) -> CoreResult<Job> {
    let action_json: Value = row.try_get("action").map_err(CoreError::Store)?;
    let action = serde_json::from_value(action_json)
        .map_err(|e| CoreError::invalid(format!("corrupt action payload: {e}")))?;
    let output_json: Option<Value> = row.try_get("output").map_err(CoreError::Store)?;
    let output: Option<JobOutput> = match output_json {
        Some(v) if !v.is_null() => Some(
            serde_json::from_value(v)
                .map_err(|e| CoreError::invalid(format!("corrupt output payload: {e}")))?,
        ),
        _ => None,
    };
    let status_str: String = row.try_get("status").map_err(CoreError::Store)?;
    let status = JobStatus::from_db_str(&status_str)
        .ok_or_else(|| CoreError::invalid(format!("unknown job status: {status_str}")))?;

    Ok(Job {
        id: row.try_get("id").map_err(CoreError::Store)?,
        uid: row.try_get("uid").map_err(CoreError::Store)?,
        input: row.try_get("input").map_err(CoreError::Store)?,
        action,
        status,
        output_version: row.try_get::<i16, _>("output_version").map_err(CoreError::Store)? as i32,
        output,
        retries: row.try_get("retries").map_err(CoreError::Store)?,
        error: row.try_get("error").map_err(CoreError::Store)?,
        progress: row.try_get("progress").map_err(CoreError::Store)?,
        created_at: row.try_get("created_at").map_err(CoreError::Store)?,
        updated_at: row.try_get("updated_at").map_err(CoreError::Store)?,
    })
}

/// Postgres type a column actually needs, used to bind JSON values with
/// their correct wire type instead of as jsonb (§6.2 schema).
#[derive(Clone, Copy)]
enum ColumnType {
    Uuid,
    SmallInt,
    BigInt,
    Bool,
    TimestampTz,
    Jsonb,
    Text,
}

fn column_type(table: &str, column: &str) -> ColumnType {
    match (table, column) {
        (_, "id") => ColumnType::BigInt,
        (_, "uid") => ColumnType::Uuid,
        ("jobs", "output_version" | "retries" | "progress") => ColumnType::SmallInt,
        ("jobs", "output" | "action") => ColumnType::Jsonb,
        ("jobs", "created_at" | "updated_at") => ColumnType::TimestampTz,
        ("workflows", "steps") => ColumnType::Jsonb,
        ("workflows", "created_at" | "updated_at") => ColumnType::TimestampTz,
        ("workflow_executions", "progress") => ColumnType::SmallInt,
        ("workflow_executions", "workflow_id") => ColumnType::BigInt,
        ("workflow_executions", "created_at" | "updated_at") => ColumnType::TimestampTz,
        ("downloads", "audio_only") => ColumnType::Bool,
        ("downloads", "file_id") => ColumnType::BigInt,
        ("downloads", "created_at") => ColumnType::TimestampTz,
        ("buckets", "created_at") => ColumnType::TimestampTz,
        ("files", "created_at") => ColumnType::TimestampTz,
        _ => ColumnType::Text,
    }
}

fn value_as_uuid(v: &Value) -> CoreResult<Uuid> {
    v.as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| CoreError::invalid(format!("expected a UUID string, got {v}")))
}

fn value_as_i16(v: &Value) -> CoreResult<i16> {
    v.as_i64()
        .and_then(|n| i16::try_from(n).ok())
        .ok_or_else(|| CoreError::invalid(format!("expected a smallint, got {v}")))
}

fn value_as_i64(v: &Value) -> CoreResult<i64> {
    v.as_i64()
        .ok_or_else(|| CoreError::invalid(format!("expected an integer, got {v}")))
}

fn value_as_bool(v: &Value) -> CoreResult<bool> {
    v.as_bool()
        .ok_or_else(|| CoreError::invalid(format!("expected a boolean, got {v}")))
}

fn value_as_datetime(v: &Value) -> CoreResult<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CoreError::invalid(format!("expected an RFC3339 timestamp, got {v}")))
}

fn value_as_opt_string(v: &Value) -> CoreResult<Option<String>> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(CoreError::invalid(format!("expected a string, got {other}"))),
    }
}

/// Bind `$value` onto `$query` using the native Postgres type `$col_type`
/// calls for, instead of the driver's default jsonb encoding for
/// `serde_json::Value` — the two differ for every non-jsonb column
/// (§6.2). A macro, not a generic fn, because `sqlx::query` and
/// `sqlx::query_scalar` are distinct concrete types.
macro_rules! bind_typed {
    ($query:expr, $col_type:expr, $value:expr) => {
        match $col_type {
            ColumnType::Uuid => $query.bind(value_as_uuid($value)?),
            ColumnType::SmallInt => $query.bind(value_as_i16($value)?),
            ColumnType::BigInt => $query.bind(value_as_i64($value)?),
            ColumnType::Bool => $query.bind(value_as_bool($value)?),
            ColumnType::TimestampTz => $query.bind(value_as_datetime($value)?),
            ColumnType::Jsonb => $query.bind($value.clone()),
            ColumnType::Text => $query.bind(value_as_opt_string($value)?),
        }
    };
}

fn where_clause<'a>(
    filters: &'a [Filter],
    condition: FilterCondition,
    start_idx: usize,
) -> (String, Vec<&'a Filter>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }
    let joiner = match condition {
        FilterCondition::And => " AND ",
        FilterCondition::Or => " OR ",
    };
    let mut clauses = Vec::with_capacity(filters.len());
    let mut refs = Vec::with_capacity(filters.len());
    for (i, f) in filters.iter().enumerate() {
        clauses.push(format!("{} = ${}", f.column, start_idx + i));
        refs.push(f);
    }
    (format!(" WHERE {}", clauses.join(joiner)), refs)
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, table: &str, record: Value) -> CoreResult<i64> {
        let obj = record
            .as_object()
            .ok_or_else(|| CoreError::invalid("create record must be a JSON object"))?;
        let columns: Vec<&String> = obj.keys().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
            columns
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query_scalar(&sql);
        for c in &columns {
            query = bind_typed!(query, column_type(table, c.as_str()), &obj[*c]);
        }
        let id: i64 = query.fetch_one(&self.pool).await.map_err(CoreError::Store)?;
        Ok(id)
    }

    async fn create_many(&self, table: &str, records: Vec<Value>) -> CoreResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(records.len());
        let mut tx = self.pool.begin().await.map_err(CoreError::Store)?;
        for record in records {
            let obj = record
                .as_object()
                .ok_or_else(|| CoreError::invalid("create_many record must be a JSON object"))?;
            let columns: Vec<&String> = obj.keys().collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
                columns
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders.join(", ")
            );
            let mut query = sqlx::query_scalar(&sql);
            for c in &columns {
                query = bind_typed!(query, column_type(table, c.as_str()), &obj[*c]);
            }
            let id: i64 = query.fetch_one(&mut *tx).await.map_err(CoreError::Store)?;
            ids.push(id);
        }
        tx.commit().await.map_err(CoreError::Store)?;
        Ok(ids)
    }

    async fn read(
        &self,
        table: &str,
        filters: &[Filter],
        condition: FilterCondition,
        limit: i64,
        last_id: i64,
    ) -> CoreResult<Vec<Value>> {
        let (mut clause, filter_refs) = where_clause(filters, condition, 1);
        if clause.is_empty() {
            clause = format!(" WHERE id > ${}", filter_refs.len() + 1);
        } else {
            clause.push_str(&format!(" AND id > ${}", filter_refs.len() + 1));
        }
        let sql = format!(
            "SELECT * FROM {table}{clause} ORDER BY id LIMIT ${}",
            filter_refs.len() + 2
        );
        let mut query = sqlx::query(&sql);
        for f in &filter_refs {
            query = bind_typed!(query, column_type(table, f.column), &f.value);
        }
        query = query.bind(last_id).bind(limit);
        let rows = query.fetch_all(&self.pool).await.map_err(CoreError::Store)?;
        rows.iter().map(row_to_generic_json).collect()
    }

    async fn update(&self, table: &str, set_values: Value, filters: &[Filter]) -> CoreResult<u64> {
        let obj = set_values
            .as_object()
            .ok_or_else(|| CoreError::invalid("update set_values must be a JSON object"))?;
        let set_cols: Vec<&String> = obj.keys().collect();
        let set_clause: Vec<String> = set_cols
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ${}", i + 1))
            .collect();
        let (where_sql, filter_refs) = where_clause(filters, FilterCondition::And, set_cols.len() + 1);
        let sql = format!("UPDATE {table} SET {}{where_sql}", set_clause.join(", "));
        let mut query = sqlx::query(&sql);
        for c in &set_cols {
            query = bind_typed!(query, column_type(table, c.as_str()), &obj[*c]);
        }
        for f in &filter_refs {
            query = bind_typed!(query, column_type(table, f.column), &f.value);
        }
        let result = query.execute(&self.pool).await.map_err(CoreError::Store)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> CoreResult<u64> {
        let (where_sql, filter_refs) = where_clause(filters, FilterCondition::And, 1);
        let sql = format!("DELETE FROM {table}{where_sql}");
        let mut query = sqlx::query(&sql);
        for f in &filter_refs {
            query = bind_typed!(query, column_type(table, f.column), &f.value);
        }
        let result = query.execute(&self.pool).await.map_err(CoreError::Store)?;
        Ok(result.rows_affected())
    }

    /// The only non-trivial operation (§4.E): a CTE does the selective
    /// `FOR UPDATE SKIP LOCKED`, the outer statement transitions status,
    /// so no worker can ever observe a stale row (*Dequeue exclusivity*,
    /// §8).
    async fn dequeue(&self, max_retries: i16) -> CoreResult<Option<Dequeued>> {
        const SQL: &str = r#"
            WITH candidate AS (
                SELECT j.*
                FROM jobs j
                WHERE j.status = 'queued'
                  AND j.retries <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs p
                      WHERE p.uid = j.uid
                        AND p.output_version = j.output_version - 1
                        AND p.status <> 'completed'
                  )
                ORDER BY j.created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE jobs
            SET status = 'processing', updated_at = now()
            FROM candidate
            WHERE jobs.id = candidate.id
            RETURNING jobs.*, (
                SELECT p.output FROM jobs p
                WHERE p.uid = jobs.uid AND p.output_version = jobs.output_version - 1
            ) AS previous_output
        "#;

        let row = sqlx::query(SQL)
            .bind(max_retries)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::Store)?;

        let Some(row) = row else { return Ok(None) };
        let job = row_to_job(&row)?;
        let previous_output: Option<Value> = row.try_get("previous_output").map_err(CoreError::Store)?;
        Ok(Some(Dequeued {
            job,
            previous_output,
        }))
    }

    async fn cancel(&self, job_id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE jobs SET status = 'cancelled', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Store)?;
        Ok(())
    }

    async fn complete(&self, job_id: i64, output: Value) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', output = $2, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Store)?;
        Ok(())
    }

    async fn error(&self, job_id: i64, err_text: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'error', error = $2, retries = retries + 1, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(err_text)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Store)?;
        Ok(())
    }

    async fn retry(&self, job_id: i64) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', error = NULL, retries = 0, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Store)?;
        Ok(())
    }

    async fn insert_jobs_and_execution(
        &self,
        workflow_id: i64,
        execution_uid: Uuid,
        jobs: Vec<Job>,
    ) -> CoreResult<Vec<i64>> {
        let mut tx = self.pool.begin().await.map_err(CoreError::Store)?;
        let mut ids = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let action = serde_json::to_value(&job.action)
                .map_err(|e| CoreError::invalid(format!("unserialisable action: {e}")))?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO jobs (uid, output_version, input, action, status, retries, progress)
                 VALUES ($1, $2, $3, $4, $5, 0, 0) RETURNING id",
            )
            .bind(job.uid)
            .bind(job.output_version as i16)
            .bind(&job.input)
            .bind(action)
            .bind(job.status.as_db_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(CoreError::Store)?;
            ids.push(id);
        }
        sqlx::query(
            "INSERT INTO workflow_executions (workflow_id, uid, progress, created_at, updated_at)
             VALUES ($1, $2, 0, now(), now())",
        )
        .bind(workflow_id)
        .bind(execution_uid)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::Store)?;
        tx.commit().await.map_err(CoreError::Store)?;
        Ok(ids)
    }
}

/// `read()` is generic over table shape, so columns are decoded by
/// trying the types actually used across the schema (§6.2) in turn.
/// Good enough for the listing endpoints this backs; callers that need
/// the typed model go through `dequeue`/`row_to_job` instead.
fn row_to_generic_json(row: &PgRow) -> CoreResult<Value> {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), decode_column_as_json(row, name));
    }
    Ok(Value::Object(map))
}

fn decode_column_as_json(row: &PgRow, name: &str) -> Value {
    if let Ok(v) = row.try_get::<Value, _>(name) {
        return v;
    }
    if let Ok(v) = row.try_get::<String, _>(name) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(name) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<i32, _>(name) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<i16, _>(name) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(name) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<Uuid, _>(name) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(name) {
        return Value::String(v.to_rfc3339());
    }
    Value::Null
}
