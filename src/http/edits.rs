//! `/edits` routes (§6.1): single ad-hoc recipes, not workflows.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::core::dispatch;
use crate::core::ops::OperationRecord;
use crate::core::store::{Filter, FilterCondition};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/edits", post(create_edit).get(list_edits))
        .route("/edits/status", get(status_stream))
        .route(
            "/edits/:id",
            get(get_edit).patch(update_edit),
        )
        .route("/edits/:id/retry", post(retry_edit))
        .route("/edits/:id/cancel", post(cancel_edit))
}

#[derive(Debug, Deserialize)]
struct CreateEditRequest {
    media: String,
    operations: Vec<OperationRecord>,
}

#[derive(Debug, Serialize)]
struct CreateEditResponse {
    id: Uuid,
    media: String,
    operations: Vec<OperationRecord>,
}

async fn create_edit(
    State(state): State<AppState>,
    Json(body): Json<CreateEditRequest>,
) -> ApiResult<Json<CreateEditResponse>> {
    dispatch::validate_recipe(&body.operations)?;

    let uid = Uuid::new_v4();
    let action = serde_json::to_value(&body.operations)
        .map_err(|e| crate::error::CoreError::invalid(format!("unserialisable operations: {e}")))?;

    state
        .store
        .create(
            "jobs",
            serde_json::json!({
                "uid": uid,
                "output_version": 0i16,
                "input": body.media,
                "action": action,
                "status": "queued",
                "retries": 0i16,
                "progress": 0i16,
            }),
        )
        .await?;

    Ok(Json(CreateEditResponse {
        id: uid,
        media: body.media,
        operations: body.operations,
    }))
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

async fn list_edits(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let rows = state
        .store
        .read("jobs", &[], FilterCondition::And, q.limit, q.last_id)
        .await?;
    Ok(Json(rows))
}

async fn get_edit(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    let mut rows = state.store.read("jobs", &filters, FilterCondition::And, 1, 0).await?;
    rows.pop()
        .map(Json)
        .ok_or_else(|| ApiError(crate::error::CoreError::invalid(format!("no job with id {id}"))))
}

async fn update_edit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(set_values): Json<Value>,
) -> ApiResult<Json<Value>> {
    let filters = [Filter { column: "id", value: serde_json::json!(id) }];
    state.store.update("jobs", set_values, &filters).await?;
    Ok(Json(serde_json::json!({ "id": id, "updated": true })))
}

/// Retry sets status back to QUEUED and clears `error` (§6.1).
async fn retry_edit(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    state.store.retry(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "queued" })))
}

/// Cancel dispatches via the pool (interrupts an in-flight job) and
/// updates the row regardless of whether any worker held it (§6.1).
async fn cancel_edit(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    state.pool.cancel(id);
    state.store.cancel(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "cancelled" })))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    uid: Uuid,
}

async fn status_stream(
    State(state): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.progress.watch(q.uid).map(|update| {
        let event = Event::default()
            .event("job_update")
            .json_data(&update.job)
            .unwrap_or_else(|_| Event::default().event("job_update"));
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
