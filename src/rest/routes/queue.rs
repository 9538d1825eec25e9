// rest/routes/queue.rs — Queue REST routes.
//
// The actual wire surface of the dispatcher: operators enqueue and inspect
// tasks here, and the external helper drives its reserved task types through
// the same start/complete/fail operations the in-process workers use.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::queue::store::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::queue::{TaskListParams, TaskRecord, TaskStatus, TaskType};
use crate::rest::{bad_request, store_error, ApiError};
use crate::AppContext;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    pub song_id: Option<String>,
    pub payload: Option<Value>,
    pub priority: Option<i64>,
    pub max_retries: Option<i64>,
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    let task_type: TaskType = body.task_type.parse().map_err(bad_request)?;
    let payload = body.payload.map(|v| v.to_string());
    let task = ctx
        .tasks
        .enqueue(
            task_type,
            body.song_id.as_deref(),
            payload.as_deref(),
            body.priority.unwrap_or(0),
            body.max_retries.unwrap_or(ctx.config.worker.max_retries),
        )
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(bad_request)?;
    let task_type = q
        .task_type
        .as_deref()
        .map(str::parse::<TaskType>)
        .transpose()
        .map_err(bad_request)?;
    let skip = q.skip.unwrap_or(0).max(0);
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let (items, total) = ctx
        .tasks
        .list(&TaskListParams {
            status,
            task_type,
            skip,
            limit: Some(limit),
        })
        .await
        .map_err(store_error)?;

    let has_more = skip + (items.len() as i64) < total;
    Ok(Json(json!({
        "items": items,
        "meta": { "total": total, "skip": skip, "limit": limit, "has_more": has_more },
    })))
}

pub async fn stats(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let stats = ctx.tasks.stats().await.map_err(store_error)?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

pub async fn start_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<TaskRecord>, ApiError> {
    let task = ctx.tasks.start(id).await.map_err(store_error)?;
    Ok(Json(task))
}

#[derive(Deserialize, Default)]
pub struct CompleteTaskRequest {
    pub result: Option<Value>,
}

pub async fn complete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    body: Option<Json<CompleteTaskRequest>>,
) -> Result<Json<TaskRecord>, ApiError> {
    let result = body.and_then(|Json(b)| b.result).map(|v| v.to_string());
    let task = ctx
        .tasks
        .mark_completed(id, result.as_deref())
        .await
        .map_err(store_error)?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct FailTaskQuery {
    pub error: Option<String>,
}

pub async fn fail_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Query(q): Query<FailTaskQuery>,
) -> Result<Json<TaskRecord>, ApiError> {
    let error = q.error.unwrap_or_else(|| "unspecified failure".to_string());
    let task = ctx.tasks.mark_failed(id, &error).await.map_err(store_error)?;
    Ok(Json(task))
}

pub async fn retry_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<TaskRecord>, ApiError> {
    let task = ctx.tasks.retry(id).await.map_err(store_error)?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let task = ctx.tasks.delete_pending(id).await.map_err(store_error)?;
    Ok(Json(json!({ "deleted": true, "id": task.id })))
}

pub async fn clear_completed(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let deleted = ctx
        .tasks
        .clear_by_status(TaskStatus::Completed)
        .await
        .map_err(store_error)?;
    Ok(Json(json!({ "deleted_count": deleted })))
}

pub async fn clear_failed(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let deleted = ctx
        .tasks
        .clear_by_status(TaskStatus::Failed)
        .await
        .map_err(store_error)?;
    Ok(Json(json!({ "deleted_count": deleted })))
}
