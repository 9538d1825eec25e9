// SPDX-License-Identifier: MIT
//! Worker pool: claims tasks, dispatches to handlers, applies outcomes.
//!
//! Each worker is an independent loop over one shared `TaskStore`. A worker
//! handles one task at a time and keeps claiming while actionable work is
//! available; it sleeps for the check interval when the queue is empty or
//! when the only claimable work belongs to an external helper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::{HandlerRegistry, Outcome};
use super::store::{StoreError, TaskStore};
use super::{TaskRecord, TaskStatus};

/// Lifecycle manager for a fixed set of workers. Holds no task state.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing the given store and registry. Returns
    /// immediately; the workers run until `stop`.
    pub fn start(
        count: usize,
        store: Arc<TaskStore>,
        registry: Arc<HandlerRegistry>,
        check_interval: Duration,
        default_max_retries: i64,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker = Worker {
                id,
                store: Arc::clone(&store),
                registry: Arc::clone(&registry),
                check_interval,
                default_max_retries,
            };
            handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }
        info!(workers = count, "worker pool started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Cooperative shutdown: each worker finishes the task it is on, stops
    /// claiming, and exits. Returns once every worker has quiesced. In-flight
    /// handler calls are never interrupted.
    pub async fn stop(self) {
        // Receivers may already be gone if workers panicked.
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

/// How one processed task affects the loop cadence.
enum Pace {
    /// Actionable work was done; claim again immediately.
    Drain,
    /// Nothing actionable (hand-off to an external helper); sleep before the
    /// next claim so the helper-reserved task at the head of the queue is not
    /// re-claimed in a hot loop.
    Idle,
}

struct Worker {
    id: usize,
    store: Arc<TaskStore>,
    registry: Arc<HandlerRegistry>,
    check_interval: Duration,
    /// Retry budget for pipeline stages this worker enqueues itself.
    default_max_retries: i64,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pace = match self.store.claim_next().await {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => Pace::Idle,
                Err(e) => {
                    // Store trouble is not any task's fault; log and poll again.
                    warn!(worker = self.id, err = %e, "failed to claim next task");
                    Pace::Idle
                }
            };
            if let Pace::Idle = pace {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.check_interval) => {}
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, task: TaskRecord) -> Pace {
        debug!(
            worker = self.id,
            task_id = task.id,
            task_type = %task.task_type,
            song_id = task.song_id.as_deref().unwrap_or("-"),
            "task claimed"
        );

        let outcome = match self.registry.get(task.task_type) {
            Some(handler) => handler.run(&task).await,
            // The registry is fixed at startup, so this is a wiring error
            // that retrying cannot fix.
            None => Outcome::Fatal(format!(
                "no handler registered for task type '{}'",
                task.task_type
            )),
        };

        let pace = match outcome {
            Outcome::Handoff => Pace::Idle,
            _ => Pace::Drain,
        };
        if let Err(e) = self.apply(&task, outcome).await {
            error!(worker = self.id, task_id = task.id, err = %e, "failed to record task outcome");
        }
        pace
    }

    /// Translate a handler outcome into store transitions. This is the only
    /// place worker-side queue state changes happen.
    async fn apply(&self, task: &TaskRecord, outcome: Outcome) -> Result<(), StoreError> {
        match outcome {
            Outcome::Success { result, next_task } => {
                let doc = result.map(|v| v.to_string());
                self.store.mark_completed(task.id, doc.as_deref()).await?;
                info!(
                    worker = self.id,
                    task_id = task.id,
                    task_type = %task.task_type,
                    "task completed"
                );
                if let Some(next) = next_task {
                    let chained = self
                        .store
                        .enqueue(
                            next,
                            task.song_id.as_deref(),
                            None,
                            task.priority,
                            self.default_max_retries,
                        )
                        .await?;
                    info!(
                        worker = self.id,
                        task_id = chained.id,
                        task_type = %next,
                        song_id = task.song_id.as_deref().unwrap_or("-"),
                        "queued next pipeline stage"
                    );
                }
            }
            Outcome::Retryable(err) => {
                let updated = self.store.mark_failed(task.id, &err).await?;
                if updated.status == TaskStatus::Failed {
                    warn!(
                        worker = self.id,
                        task_id = task.id,
                        attempts = updated.retry_count,
                        err = %err,
                        "task failed, retry budget exhausted"
                    );
                } else {
                    warn!(
                        worker = self.id,
                        task_id = task.id,
                        attempt = updated.retry_count,
                        max_retries = updated.max_retries,
                        err = %err,
                        "task failed, returned to queue"
                    );
                }
            }
            Outcome::Fatal(err) => {
                self.store.mark_failed_terminal(task.id, &err).await?;
                error!(worker = self.id, task_id = task.id, err = %err, "task failed terminally");
            }
            Outcome::Handoff => {
                self.store.requeue_for_helper(task.id).await?;
                debug!(
                    worker = self.id,
                    task_id = task.id,
                    task_type = %task.task_type,
                    "task left for external helper"
                );
            }
        }
        Ok(())
    }
}
