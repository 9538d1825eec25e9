// SPDX-License-Identifier: MIT
//! SQLite-backed task queue store.
//!
//! Every state transition is a single conditional `UPDATE ... RETURNING`
//! statement, so concurrent workers sharing the pool can never double-claim
//! or double-transition a task. SQLite serializes writers; the `WHERE`
//! clause re-checks the expected status inside that serialization window.

use sqlx::SqlitePool;

use crate::storage::{now_ts, with_timeout};
use super::{QueueStats, TaskListParams, TaskRecord, TaskStatus, TaskType};

pub use crate::storage::StoreError;

/// Default page size for task listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
/// Hard cap on task listing page size.
pub const MAX_LIST_LIMIT: i64 = 200;

/// Persistent task queue operations.
#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ─── Producers ───────────────────────────────────────────────────────

    /// Insert a new pending task and return the stored row.
    pub async fn enqueue(
        &self,
        task_type: TaskType,
        song_id: Option<&str>,
        payload: Option<&str>,
        priority: i64,
        max_retries: i64,
    ) -> Result<TaskRecord, StoreError> {
        let now = now_ts();
        let task = sqlx::query_as::<_, TaskRecord>(
            "INSERT INTO task_queue
                (task_type, song_id, status, priority, payload, retry_count, max_retries, created_at)
             VALUES (?1, ?2, 'pending', ?3, ?4, 0, ?5, ?6)
             RETURNING *",
        )
        .bind(task_type)
        .bind(song_id)
        .bind(priority)
        .bind(payload)
        .bind(max_retries)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(task)
    }

    // ─── Claiming ────────────────────────────────────────────────────────

    /// Atomically claim the next eligible pending task, or return `None`
    /// when the queue is empty.
    ///
    /// Highest priority wins; ties fall back to oldest `created_at`, then
    /// lowest id. The claimed task is moved to `running` with `started_at`
    /// stamped in the same statement, so two concurrent callers can never
    /// receive the same task.
    pub async fn claim_next(&self) -> Result<Option<TaskRecord>, StoreError> {
        let now = now_ts();
        with_timeout(async {
            let task = sqlx::query_as::<_, TaskRecord>(
                "UPDATE task_queue
                    SET status = 'running', started_at = ?1
                  WHERE id = (SELECT id FROM task_queue
                               WHERE status = 'pending'
                               ORDER BY priority DESC, created_at ASC, id ASC
                               LIMIT 1)
                    AND status = 'pending'
                  RETURNING *",
            )
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(task)
        })
        .await
    }

    /// Move a specific pending task to `running` (external helpers that
    /// process their own tasks use this instead of `claim_next`).
    pub async fn start(&self, id: i64) -> Result<TaskRecord, StoreError> {
        let now = now_ts();
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue SET status = 'running', started_at = ?1
              WHERE id = ?2 AND status = 'pending'
              RETURNING *",
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(task) => Ok(task),
            None => Err(self.transition_error(id, "start").await?),
        }
    }

    // ─── Completion and failure ──────────────────────────────────────────

    /// Mark a running task completed, stamping `completed_at` and storing
    /// the result document if one is given.
    ///
    /// Idempotent: completing an already-completed task changes nothing
    /// and returns the stored row as-is. Any other status is refused, so a
    /// task can never reach `completed` without having run.
    pub async fn mark_completed(
        &self,
        id: i64,
        result: Option<&str>,
    ) -> Result<TaskRecord, StoreError> {
        let now = now_ts();
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue
                SET status = 'completed', completed_at = ?1, result = COALESCE(?2, result)
              WHERE id = ?3 AND status = 'running'
              RETURNING *",
        )
        .bind(now)
        .bind(result)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(task) => Ok(task),
            None => match self.get(id).await? {
                Some(task) if task.status == TaskStatus::Completed => Ok(task),
                Some(task) => Err(StoreError::InvalidTransition {
                    action: "complete",
                    status: task.status.to_string(),
                }),
                None => Err(StoreError::NotFound),
            },
        }
    }

    /// Record a failed attempt of a running task and apply the
    /// retry-or-terminal rule. Only `running` tasks can fail: an attempt
    /// must have been started before it can be charged against the budget.
    ///
    /// The retry budget is checked against the count *before* this failure:
    /// a task with `max_retries = r` survives r failures (returning to
    /// `pending` each time with `started_at` cleared) and goes terminally
    /// `failed` on failure r + 1.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<TaskRecord, StoreError> {
        let now = now_ts();
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue SET
                status       = CASE WHEN retry_count >= max_retries THEN 'failed' ELSE 'pending' END,
                completed_at = CASE WHEN retry_count >= max_retries THEN ?1 ELSE completed_at END,
                started_at   = CASE WHEN retry_count >= max_retries THEN started_at ELSE NULL END,
                retry_count  = retry_count + 1,
                error_message = ?2
              WHERE id = ?3 AND status = 'running'
              RETURNING *",
        )
        .bind(now)
        .bind(error)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(task) => Ok(task),
            None => Err(self.transition_error(id, "fail").await?),
        }
    }

    /// Fail a task terminally regardless of remaining retry budget.
    /// Used for errors that retrying cannot fix (unknown type, bad payload,
    /// missing configuration).
    pub async fn mark_failed_terminal(
        &self,
        id: i64,
        error: &str,
    ) -> Result<TaskRecord, StoreError> {
        let now = now_ts();
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue SET
                status = 'failed',
                completed_at = ?1,
                retry_count = retry_count + 1,
                error_message = ?2
              WHERE id = ?3
              RETURNING *",
        )
        .bind(now)
        .bind(error)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        updated.ok_or(StoreError::NotFound)
    }

    /// Put a running task back to `pending` with `started_at` cleared,
    /// without touching its retry budget or error message.
    ///
    /// This is how the dispatcher hands generation tasks to external
    /// helper processes: the helper finds the task pending, starts it,
    /// and reports completion through the REST interface.
    pub async fn requeue_for_helper(&self, id: i64) -> Result<TaskRecord, StoreError> {
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue SET status = 'pending', started_at = NULL
              WHERE id = ?1 AND status = 'running'
              RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(task) => Ok(task),
            None => Err(self.transition_error(id, "requeue").await?),
        }
    }

    // ─── Operator actions ────────────────────────────────────────────────

    /// Re-queue a failed or completed task for another run.
    ///
    /// Clears the error message and both timestamps but keeps
    /// `retry_count` intact, so the full history of failed attempts stays
    /// visible on the row.
    pub async fn retry(&self, id: i64) -> Result<TaskRecord, StoreError> {
        let updated = sqlx::query_as::<_, TaskRecord>(
            "UPDATE task_queue
                SET status = 'pending', error_message = NULL,
                    started_at = NULL, completed_at = NULL
              WHERE id = ?1 AND status IN ('failed', 'completed')
              RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(task) => Ok(task),
            None => Err(self.transition_error(id, "retry").await?),
        }
    }

    /// Cancel a pending task. Tasks in any other status are refused, so a
    /// running worker never has its task deleted out from under it.
    pub async fn delete_pending(&self, id: i64) -> Result<TaskRecord, StoreError> {
        let deleted = sqlx::query_as::<_, TaskRecord>(
            "DELETE FROM task_queue WHERE id = ?1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match deleted {
            Some(task) => Ok(task),
            None => Err(self.transition_error(id, "cancel").await?),
        }
    }

    /// Bulk-delete every task in the given status. Returns the number of
    /// rows removed.
    pub async fn clear_by_status(&self, status: TaskStatus) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE status = ?1")
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal tasks older than the retention window. Returns
    /// `(completed_removed, failed_removed)`.
    pub async fn prune_terminal(&self, retention_days: i64) -> Result<(u64, u64), StoreError> {
        let cutoff = now_ts() - retention_days * 86_400;
        with_timeout(async {
            let completed = sqlx::query(
                "DELETE FROM task_queue
                  WHERE status = 'completed' AND completed_at IS NOT NULL AND completed_at < ?1",
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
            let failed = sqlx::query(
                "DELETE FROM task_queue
                  WHERE status = 'failed' AND completed_at IS NOT NULL AND completed_at < ?1",
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
            Ok((completed, failed))
        })
        .await
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub async fn get(&self, id: i64) -> Result<Option<TaskRecord>, StoreError> {
        let task = sqlx::query_as::<_, TaskRecord>("SELECT * FROM task_queue WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    /// List tasks in dispatch order with optional status / type filters.
    /// Returns the page plus the total row count matching the filters.
    pub async fn list(
        &self,
        params: &TaskListParams,
    ) -> Result<(Vec<TaskRecord>, i64), StoreError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let skip = params.skip.max(0);
        with_timeout(async {
            let tasks = sqlx::query_as::<_, TaskRecord>(
                "SELECT * FROM task_queue
                  WHERE (?1 IS NULL OR status = ?1)
                    AND (?2 IS NULL OR task_type = ?2)
                  ORDER BY priority DESC, created_at ASC, id ASC
                  LIMIT ?3 OFFSET ?4",
            )
            .bind(params.status)
            .bind(params.task_type)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM task_queue
                  WHERE (?1 IS NULL OR status = ?1)
                    AND (?2 IS NULL OR task_type = ?2)",
            )
            .bind(params.status)
            .bind(params.task_type)
            .fetch_one(&self.pool)
            .await?;
            Ok((tasks, total))
        })
        .await
    }

    /// Aggregate queue statistics: counts by status and type, average
    /// completion time, and the age of the oldest pending task.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        with_timeout(async {
            let mut stats = QueueStats::default();

            let by_status: Vec<(String, i64)> = sqlx::query_as(
                "SELECT status, COUNT(*) FROM task_queue GROUP BY status",
            )
            .fetch_all(&self.pool)
            .await?;
            for (status, count) in by_status {
                stats.total_count += count;
                match status.as_str() {
                    "pending" => stats.pending_count = count,
                    "running" => stats.running_count = count,
                    "completed" => stats.completed_count = count,
                    "failed" => stats.failed_count = count,
                    _ => {}
                }
            }

            let by_type: Vec<(String, i64)> = sqlx::query_as(
                "SELECT task_type, COUNT(*) FROM task_queue GROUP BY task_type",
            )
            .fetch_all(&self.pool)
            .await?;
            for (task_type, count) in by_type {
                match task_type.as_str() {
                    "generate-upload" => stats.generate_upload_count = count,
                    "generate-download" => stats.generate_download_count = count,
                    "evaluate" => stats.evaluate_count = count,
                    "publish" => stats.publish_count = count,
                    "cleanup" => stats.cleanup_count = count,
                    _ => {}
                }
            }

            stats.avg_completion_time_seconds = sqlx::query_scalar(
                "SELECT AVG(completed_at - created_at) FROM task_queue
                  WHERE status = 'completed' AND completed_at IS NOT NULL",
            )
            .fetch_one(&self.pool)
            .await?;

            let oldest_pending: Option<i64> = sqlx::query_scalar(
                "SELECT MIN(created_at) FROM task_queue WHERE status = 'pending'",
            )
            .fetch_one(&self.pool)
            .await?;
            stats.oldest_pending_task_age_seconds =
                oldest_pending.map(|created| (now_ts() - created).max(0));

            Ok(stats)
        })
        .await
    }

    /// Build the right error for a conditional update that matched no row:
    /// `NotFound` if the task does not exist, otherwise `InvalidTransition`
    /// carrying the task's actual status.
    async fn transition_error(
        &self,
        id: i64,
        action: &'static str,
    ) -> Result<StoreError, StoreError> {
        match self.get(id).await? {
            None => Ok(StoreError::NotFound),
            Some(task) => Ok(StoreError::InvalidTransition {
                action,
                status: task.status.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    async fn open_store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        (TaskStore::new(storage.pool().clone()), dir)
    }

    /// Shift a task's created_at into the past so ordering tests do not
    /// depend on wall-clock resolution.
    async fn backdate_created(store: &TaskStore, id: i64, secs: i64) {
        sqlx::query("UPDATE task_queue SET created_at = created_at - ?1 WHERE id = ?2")
            .bind(secs)
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_starts_pending_with_zero_retries() {
        let (store, _dir) = open_store().await;
        let task = store
            .enqueue(TaskType::Evaluate, Some("song-1"), None, 5, 3)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.priority, 5);
        assert_eq!(task.song_id.as_deref(), Some("song-1"));
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
    }

    #[tokio::test]
    async fn claim_returns_none_on_empty_queue() {
        let (store, _dir) = open_store().await;
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_moves_task_to_running() {
        let (store, _dir) = open_store().await;
        let task = store
            .enqueue(TaskType::Publish, Some("song-1"), None, 0, 3)
            .await
            .unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_prefers_higher_priority() {
        let (store, _dir) = open_store().await;
        let low = store.enqueue(TaskType::Evaluate, None, None, 1, 3).await.unwrap();
        let high = store.enqueue(TaskType::Evaluate, None, None, 50, 3).await.unwrap();
        // The low-priority task is older, but priority wins.
        backdate_created(&store, low.id, 120).await;

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, high.id);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, low.id);
    }

    #[tokio::test]
    async fn claim_is_fifo_within_equal_priority() {
        let (store, _dir) = open_store().await;
        let first = store.enqueue(TaskType::Evaluate, None, None, 5, 3).await.unwrap();
        let second = store.enqueue(TaskType::Evaluate, None, None, 5, 3).await.unwrap();
        // Make the later insert strictly older; created_at must beat id.
        backdate_created(&store, second.id, 60).await;

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, second.id);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_task() {
        let (store, _dir) = open_store().await;
        store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();

        let (a, b) = tokio::join!(store.claim_next(), store.claim_next());
        let claims = [a.unwrap(), b.unwrap()];
        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn retry_budget_allows_max_retries_then_fails_terminally() {
        let (store, _dir) = open_store().await;
        let max_retries = 2;
        let task = store
            .enqueue(TaskType::Evaluate, None, None, 0, max_retries)
            .await
            .unwrap();

        // The task survives `max_retries` failures, pending each time.
        for attempt in 1..=max_retries {
            let claimed = store.claim_next().await.unwrap().unwrap();
            assert_eq!(claimed.id, task.id);
            let failed = store.mark_failed(task.id, "transient").await.unwrap();
            assert_eq!(failed.status, TaskStatus::Pending);
            assert_eq!(failed.retry_count, attempt);
            assert!(failed.started_at.is_none());
            assert_eq!(failed.error_message.as_deref(), Some("transient"));
        }

        // Failure number max_retries + 1 is terminal.
        store.claim_next().await.unwrap().unwrap();
        let failed = store.mark_failed(task.id, "gave up").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, max_retries + 1);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn terminal_failure_ignores_remaining_budget() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Publish, None, None, 0, 5).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let failed = store.mark_failed_terminal(task.id, "song not found").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let first = store
            .mark_completed(task.id, Some(r#"{"score":83.0}"#))
            .await
            .unwrap();
        assert_eq!(first.status, TaskStatus::Completed);

        let second = store.mark_completed(task.id, None).await.unwrap();
        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.result.as_deref(), Some(r#"{"score":83.0}"#));
    }

    #[tokio::test]
    async fn complete_requires_a_running_task() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();

        // A task that never started cannot jump straight to completed.
        let err = store.mark_completed(task.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { action: "complete", .. }
        ));
        let unchanged = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Pending);
        assert!(unchanged.completed_at.is_none());

        assert!(matches!(
            store.mark_completed(9999, None).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn fail_requires_a_running_task() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();

        // A task that never started cannot jump straight to failed.
        let err = store.mark_failed(task.id, "boom").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { action: "fail", .. }
        ));
        let unchanged = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Pending);
        assert_eq!(unchanged.retry_count, 0);
        assert!(unchanged.error_message.is_none());

        assert!(matches!(
            store.mark_failed(9999, "boom").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn requeue_for_helper_clears_started_at_only() {
        let (store, _dir) = open_store().await;
        let task = store
            .enqueue(TaskType::GenerateUpload, Some("song-1"), None, 0, 3)
            .await
            .unwrap();
        store.claim_next().await.unwrap().unwrap();

        let requeued = store.requeue_for_helper(task.id).await.unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert!(requeued.started_at.is_none());
        assert_eq!(requeued.retry_count, 0);

        // Not running any more, so a second requeue is refused.
        let err = store.requeue_for_helper(task.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_requeues_but_keeps_retry_count() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 0).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        // Budget of zero: first failure is terminal.
        let failed = store.mark_failed(task.id, "boom").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);

        let retried = store.retry(task.id).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.error_message.is_none());
        assert!(retried.started_at.is_none());
        assert!(retried.completed_at.is_none());
    }

    #[tokio::test]
    async fn retry_refuses_pending_and_running_tasks() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        assert!(matches!(
            store.retry(task.id).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));

        store.claim_next().await.unwrap().unwrap();
        assert!(matches!(
            store.retry(task.id).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_only_removes_pending_tasks() {
        let (store, _dir) = open_store().await;
        let pending = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        let running = store.enqueue(TaskType::Publish, None, None, 0, 3).await.unwrap();
        store.start(running.id).await.unwrap();

        store.delete_pending(pending.id).await.unwrap();
        assert!(store.get(pending.id).await.unwrap().is_none());

        let err = store.delete_pending(running.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        // Refusal leaves the row untouched.
        let still_there = store.get(running.id).await.unwrap().unwrap();
        assert_eq!(still_there.status, TaskStatus::Running);

        assert!(matches!(
            store.delete_pending(9999).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn start_refuses_non_pending() {
        let (store, _dir) = open_store().await;
        let task = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        store.start(task.id).await.unwrap();
        assert!(matches!(
            store.start(task.id).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn list_filters_and_paginates_in_dispatch_order() {
        let (store, _dir) = open_store().await;
        for i in 0..5 {
            store
                .enqueue(TaskType::Evaluate, None, None, i, 3)
                .await
                .unwrap();
        }
        store.enqueue(TaskType::Publish, None, None, 100, 3).await.unwrap();

        let (page, total) = store
            .list(&TaskListParams {
                status: Some(TaskStatus::Pending),
                task_type: Some(TaskType::Evaluate),
                skip: 0,
                limit: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 3);
        // Highest priority first.
        assert_eq!(page[0].priority, 4);

        let (rest, _) = store
            .list(&TaskListParams {
                status: Some(TaskStatus::Pending),
                task_type: Some(TaskType::Evaluate),
                skip: 3,
                limit: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn clear_by_status_removes_only_that_status() {
        let (store, _dir) = open_store().await;
        let a = store.enqueue(TaskType::Evaluate, None, None, 0, 0).await.unwrap();
        let b = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        store.mark_failed(a.id, "x").await.unwrap();

        assert_eq!(store.clear_by_status(TaskStatus::Failed).await.unwrap(), 1);
        assert!(store.get(a.id).await.unwrap().is_none());
        assert!(store.get(b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn prune_removes_old_terminal_tasks_only() {
        let (store, _dir) = open_store().await;
        let old_done = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        let fresh_done = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        let pending = store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        store.start(old_done.id).await.unwrap();
        store.mark_completed(old_done.id, None).await.unwrap();
        store.start(fresh_done.id).await.unwrap();
        store.mark_completed(fresh_done.id, None).await.unwrap();
        // Push one completion far past the retention window.
        sqlx::query("UPDATE task_queue SET completed_at = completed_at - 40 * 86400 WHERE id = ?1")
            .bind(old_done.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let (completed, failed) = store.prune_terminal(30).await.unwrap();
        assert_eq!((completed, failed), (1, 0));
        assert!(store.get(old_done.id).await.unwrap().is_none());
        assert!(store.get(fresh_done.id).await.unwrap().is_some());
        assert!(store.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_aggregates_counts_and_ages() {
        let (store, _dir) = open_store().await;
        let done = store.enqueue(TaskType::GenerateUpload, None, None, 0, 3).await.unwrap();
        store.enqueue(TaskType::Evaluate, None, None, 0, 3).await.unwrap();
        store.enqueue(TaskType::Publish, None, None, 0, 3).await.unwrap();
        store.start(done.id).await.unwrap();
        store.mark_completed(done.id, None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.pending_count, 2);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.generate_upload_count, 1);
        assert_eq!(stats.evaluate_count, 1);
        assert_eq!(stats.publish_count, 1);
        assert!(stats.avg_completion_time_seconds.is_some());
        assert!(stats.oldest_pending_task_age_seconds.is_some());
    }
}
