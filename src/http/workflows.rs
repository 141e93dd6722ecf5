//! `/workflows` routes (§6.1): stored, reusable multi-step recipes.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::core::dispatch;
use crate::core::models::{JobStatus, Workflow};
use crate::core::ops::OperationRecord;
use crate::core::store::{Filter, FilterCondition};
use crate::error::CoreError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/execute", post(execute_workflow))
        .route("/workflows/executions", get(list_executions))
        .route("/workflows/executions/:id/jobs", get(execution_jobs))
        .route(
            "/workflows/:id",
            get(get_workflow).patch(update_workflow).delete(delete_workflow),
        )
        .route("/workflows/:id/retry", post(retry_workflow))
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    name: String,
    steps: Vec<Vec<OperationRecord>>,
    search: Option<String>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkflowRequest>,
) -> ApiResult<Json<Value>> {
    for step in &body.steps {
        dispatch::validate_recipe(step)?;
    }

    let steps_json = serde_json::to_value(&body.steps)
        .map_err(|e| CoreError::invalid(format!("unserialisable steps: {e}")))?;
    let id = state
        .store
        .create(
            "workflows",
            serde_json::json!({ "name": body.name, "search": body.search, "steps": steps_json }),
        )
        .await?;

    fetch_workflow_row(&state, id).await
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    last_id: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let rows = state
        .store
        .read("workflows", &[], FilterCondition::And, q.limit, q.last_id)
        .await?;
    Ok(Json(rows))
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    fetch_workflow_row(&state, id).await
}

async fn fetch_workflow_row(state: &AppState, id: i64) -> ApiResult<Json<Value>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    let mut rows = state.store.read("workflows", &filters, FilterCondition::And, 1, 0).await?;
    rows.pop()
        .map(Json)
        .ok_or_else(|| ApiError(CoreError::invalid(format!("no workflow with id {id}"))))
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(set_values): Json<Value>,
) -> ApiResult<Json<Value>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    state.store.update("workflows", set_values, &filters).await?;
    fetch_workflow_row(&state, id).await
}

async fn delete_workflow(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    let affected = state.store.delete("workflows", &filters).await?;
    Ok(Json(serde_json::json!({ "id": id, "deleted": affected > 0 })))
}

#[derive(Debug, Deserialize)]
struct RetryWorkflowQuery {
    uid: Uuid,
}

/// Requeues jobs for the supplied uid whose status is ERROR or
/// CANCELLED (§6.1). `read` only expresses one join condition at a
/// time, so the two statuses are queried separately and merged.
async fn retry_workflow(
    State(state): State<AppState>,
    Path(_id): Path<i64>,
    Query(q): Query<RetryWorkflowQuery>,
) -> ApiResult<Json<Value>> {
    let mut retried = Vec::new();
    for status in [JobStatus::Error, JobStatus::Cancelled] {
        let filters = [
            Filter { column: "uid", value: serde_json::json!(q.uid) },
            Filter { column: "status", value: serde_json::json!(status.as_db_str()) },
        ];
        let rows = state.store.read("jobs", &filters, FilterCondition::And, 1000, 0).await?;
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_i64) {
                state.store.retry(id).await?;
                retried.push(id);
            }
        }
    }
    Ok(Json(serde_json::json!({ "uid": q.uid, "retried": retried })))
}

#[derive(Debug, Deserialize)]
struct ExecuteQuery {
    media: String,
    id: Option<i64>,
    name: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecutedWorkflow {
    uid: Uuid,
    media: String,
    operations: Vec<OperationRecord>,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    workflows: Vec<ExecutedWorkflow>,
}

/// Resolves the single workflow matching `id`, `name`, or `search` (first
/// hit wins when more than one selector matches), plans one job per step
/// under a shared execution uid, and enqueues them (§4.H, §6.1). Each
/// response entry mirrors one step rather than one matched workflow — a
/// workflow with 3 steps yields 3 entries sharing the same `uid`.
async fn execute_workflow(
    State(state): State<AppState>,
    Query(q): Query<ExecuteQuery>,
) -> ApiResult<Json<ExecuteResponse>> {
    let workflow = resolve_workflow(&state, &q).await?;
    let uid = state.planner.plan_and_enqueue(&workflow, &q.media).await?;

    let executed = workflow
        .steps
        .into_iter()
        .map(|step| ExecutedWorkflow { uid, media: q.media.clone(), operations: step })
        .collect();

    Ok(Json(ExecuteResponse { workflows: executed }))
}

async fn resolve_workflow(state: &AppState, q: &ExecuteQuery) -> ApiResult<Workflow> {
    let mut filters: Vec<Filter> = Vec::new();
    if let Some(id) = q.id {
        filters.push(Filter { column: "id", value: serde_json::json!(id) });
    }
    if let Some(name) = &q.name {
        filters.push(Filter { column: "name", value: serde_json::json!(name) });
    }
    if let Some(search) = &q.search {
        filters.push(Filter { column: "search", value: serde_json::json!(search) });
    }
    if filters.is_empty() {
        return Err(ApiError(CoreError::invalid("one of id, name, search is required")));
    }

    let rows = state.store.read("workflows", &filters, FilterCondition::Or, 1, 0).await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| ApiError(CoreError::invalid("no workflow matched the given selector")))?;
    serde_json::from_value(row)
        .map_err(|e| ApiError(CoreError::invalid(format!("corrupt workflow row: {e}"))))
}

async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let rows = state
        .store
        .read("workflow_executions", &[], FilterCondition::And, q.limit, q.last_id)
        .await?;
    Ok(Json(rows))
}

async fn execution_jobs(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Vec<Value>>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    let mut executions = state
        .store
        .read("workflow_executions", &filters, FilterCondition::And, 1, 0)
        .await?;
    let execution = executions
        .pop()
        .ok_or_else(|| ApiError(CoreError::invalid(format!("no execution with id {id}"))))?;
    let uid = execution
        .get("uid")
        .ok_or_else(|| ApiError(CoreError::invalid("execution row missing uid")))?;

    let job_filters = [Filter { column: "uid", value: uid.clone() }];
    let jobs = state.store.read("jobs", &job_filters, FilterCondition::And, 1000, 0).await?;
    Ok(Json(jobs))
}
