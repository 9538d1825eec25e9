//! Task queue: record types, persistent store, handler registry, worker pool.

pub mod handler;
pub mod store;
pub mod worker;

pub use handler::{HandlerRegistry, Outcome, TaskHandler};
pub use store::{StoreError, TaskStore};
pub use worker::WorkerPool;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Task types ───────────────────────────────────────────────────────────────

/// Closed set of task types. Adding a stage means adding a variant here and
/// registering a handler in `pipeline::build_registry` — the record shape
/// never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum TaskType {
    /// Submit a song to the generation service (external helper only).
    GenerateUpload,
    /// Fetch generated audio from the service (external helper only).
    GenerateDownload,
    /// Score downloaded audio and gate the publish stage.
    Evaluate,
    /// Render the video and push it to the publishing API.
    Publish,
    /// Prune old terminal queue records. No song target.
    Cleanup,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::GenerateUpload,
        TaskType::GenerateDownload,
        TaskType::Evaluate,
        TaskType::Publish,
        TaskType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::GenerateUpload => "generate-upload",
            TaskType::GenerateDownload => "generate-download",
            TaskType::Evaluate => "evaluate",
            TaskType::Publish => "publish",
            TaskType::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate-upload" => Ok(TaskType::GenerateUpload),
            "generate-download" => Ok(TaskType::GenerateDownload),
            "evaluate" => Ok(TaskType::Evaluate),
            "publish" => Ok(TaskType::Publish),
            "cleanup" => Ok(TaskType::Cleanup),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

// ─── Task status ──────────────────────────────────────────────────────────────

/// Queue lifecycle states. `Completed` and `Failed` are terminal; `Running`
/// must always resolve back to `Pending` (retry), `Completed`, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ─── Row types ────────────────────────────────────────────────────────────────

/// One unit of schedulable work. Timestamps are unix seconds.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub task_type: TaskType,
    /// Owning song, when the task acts on one. Maintenance tasks carry None.
    pub song_id: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
    /// Opaque JSON text, read only by the matching handler.
    pub payload: Option<String>,
    /// Opaque JSON text written back by the handler on success.
    pub result: Option<String>,
    /// Last failure reason. Cleared when the task is manually retried.
    pub error_message: Option<String>,
    /// Total failed attempts over the task's whole life. Never reset.
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

// ─── Query params ─────────────────────────────────────────────────────────────

/// Filters for `TaskStore::list`. Pagination is capped in the store.
#[derive(Debug, Default, Clone)]
pub struct TaskListParams {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub skip: i64,
    pub limit: Option<i64>,
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// Read-only aggregation over the queue, for operators and dashboards.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub running_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub total_count: i64,
    pub generate_upload_count: i64,
    pub generate_download_count: i64,
    pub evaluate_count: i64,
    pub publish_count: i64,
    pub cleanup_count: i64,
    /// Mean `completed_at - created_at` over completed tasks, seconds.
    pub avg_completion_time_seconds: Option<f64>,
    /// Age of the oldest still-pending task, seconds.
    pub oldest_pending_task_age_seconds: Option<i64>,
}
