// rest/routes/songs.rs — Song pipeline producer routes.
//
// Only the endpoints that touch the dispatcher live here: song intake, the
// two generation enqueue actions, the external helper's progress report,
// and the operator status override.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::queue::TaskType;
use crate::rest::{bad_request, store_error, ApiError};
use crate::songs::{Song, SongStatus};
use crate::AppContext;

/// Producer endpoints clamp priority so an operator typo cannot starve the
/// rest of the queue. The raw queue API accepts any integer.
const MAX_PRODUCER_PRIORITY: i64 = 100;

/// Song wire form: the row plus the resolved `effective_status`.
fn song_json(song: &Song) -> Value {
    let mut v = serde_json::to_value(song).unwrap_or_default();
    v["effective_status"] = json!(song.effective_status());
    v
}

#[derive(Deserialize)]
pub struct CreateSongRequest {
    pub id: String,
    pub title: String,
    pub genre: String,
}

pub async fn create_song(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateSongRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.id.trim().is_empty() {
        return Err(bad_request("song id must not be empty"));
    }
    let song = ctx
        .songs
        .create(&body.id, &body.title, &body.genre)
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(song_json(&song))))
}

pub async fn get_song(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match ctx.songs.get(&id).await.map_err(store_error)? {
        Some(song) => Ok(Json(song_json(&song))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "song not found" })),
        )),
    }
}

#[derive(Deserialize)]
pub struct EnqueueQuery {
    pub priority: Option<i64>,
}

pub async fn queue_upload(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(q): Query<EnqueueQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let song = require_song(&ctx, &id).await?;
    // A song already in the helper's hands must not be double-queued.
    match song.effective_status() {
        SongStatus::Uploading | SongStatus::Generating => {
            return Err(bad_request(format!(
                "song '{id}' is already {}",
                song.effective_status()
            )));
        }
        _ => {}
    }

    let task = enqueue_for_helper(&ctx, &id, TaskType::GenerateUpload, q.priority).await?;
    let song = ctx
        .songs
        .set_pipeline_status(&id, SongStatus::Uploading)
        .await
        .map_err(store_error)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "task": task, "song": song_json(&song) })),
    ))
}

pub async fn queue_download(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(q): Query<EnqueueQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_song(&ctx, &id).await?;
    let task = enqueue_for_helper(&ctx, &id, TaskType::GenerateDownload, q.priority).await?;
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub status: String,
    pub audio_path: Option<String>,
}

/// External helper's pipeline report. Only the statuses the helper owns are
/// accepted; `evaluated` and `published` belong to the in-process handlers.
pub async fn report_progress(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<ProgressRequest>,
) -> Result<Json<Value>, ApiError> {
    let status: SongStatus = body.status.parse().map_err(bad_request)?;
    if !status.helper_reportable() {
        return Err(bad_request(format!(
            "status '{status}' is reserved for pipeline handlers"
        )));
    }

    let song = match (status, body.audio_path.as_deref()) {
        (SongStatus::Downloaded, Some(audio_path)) => ctx
            .songs
            .record_download(&id, audio_path)
            .await
            .map_err(store_error)?,
        _ => ctx
            .songs
            .set_pipeline_status(&id, status)
            .await
            .map_err(store_error)?,
    };
    Ok(Json(song_json(&song)))
}

#[derive(Deserialize)]
pub struct OverrideStatusRequest {
    pub status: Option<String>,
}

/// Operator correction. Writes `status_override` only; the pipeline-derived
/// status is never touched, so clearing the override restores the true view.
pub async fn override_status(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<OverrideStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = body
        .status
        .as_deref()
        .map(str::parse::<SongStatus>)
        .transpose()
        .map_err(bad_request)?;
    let song = ctx
        .songs
        .set_override(&id, status)
        .await
        .map_err(store_error)?;
    Ok(Json(song_json(&song)))
}

async fn require_song(ctx: &AppContext, id: &str) -> Result<Song, ApiError> {
    match ctx.songs.get(id).await.map_err(store_error)? {
        Some(song) => Ok(song),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "song not found" })),
        )),
    }
}

async fn enqueue_for_helper(
    ctx: &AppContext,
    song_id: &str,
    task_type: TaskType,
    priority: Option<i64>,
) -> Result<crate::queue::TaskRecord, ApiError> {
    let priority = priority.unwrap_or(0).clamp(0, MAX_PRODUCER_PRIORITY);
    ctx.tasks
        .enqueue(
            task_type,
            Some(song_id),
            None,
            priority,
            ctx.config.worker.max_retries,
        )
        .await
        .map_err(store_error)
}
