//! Task handler trait and the type-to-handler registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{TaskRecord, TaskType};

/// What one handler attempt means for the task's queue row. Handlers never
/// touch queue state themselves; the worker applies the outcome.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Terminal success. `result` is stored on the row as JSON; `next_task`
    /// asks the worker to enqueue the following pipeline stage for the same
    /// song at the same priority.
    Success {
        result: Option<Value>,
        next_task: Option<TaskType>,
    },
    /// The attempt failed but a later one might not. Counts against the
    /// retry budget.
    Retryable(String),
    /// The task can never succeed as stored. Fails terminally no matter how
    /// much retry budget remains.
    Fatal(String),
    /// The task belongs to an external helper process. The worker returns it
    /// to `pending` untouched so the helper can pick it up over REST.
    Handoff,
}

impl Outcome {
    /// Plain success: no result document, no follow-up task.
    pub fn success() -> Self {
        Outcome::Success {
            result: None,
            next_task: None,
        }
    }
}

/// One pipeline stage's work. Implementations hold their own collaborators
/// (stores, HTTP clients) and must be shareable across workers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute a single attempt of the given task.
    async fn run(&self, task: &TaskRecord) -> Outcome;
}

/// Immutable mapping from task type to handler, built once at startup and
/// shared by every worker. A type with no entry is a configuration error
/// and the worker fails such tasks terminally.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handler for task types the daemon does not process in-house. Always
/// yields `Handoff`, bouncing the task back to `pending` for the external
/// helper that owns it.
pub struct HandoffHandler;

#[async_trait]
impl TaskHandler for HandoffHandler {
    async fn run(&self, _task: &TaskRecord) -> Outcome {
        Outcome::Handoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskStatus;

    struct Always(fn() -> Outcome);

    #[async_trait]
    impl TaskHandler for Always {
        async fn run(&self, _task: &TaskRecord) -> Outcome {
            (self.0)()
        }
    }

    fn fake_task(task_type: TaskType) -> TaskRecord {
        TaskRecord {
            id: 1,
            task_type,
            song_id: Some("song-1".into()),
            status: TaskStatus::Running,
            priority: 0,
            payload: None,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            created_at: 0,
            started_at: Some(0),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(TaskType::Evaluate, Arc::new(Always(Outcome::success)));

        let handler = registry.get(TaskType::Evaluate).unwrap();
        let outcome = handler.run(&fake_task(TaskType::Evaluate)).await;
        assert!(matches!(outcome, Outcome::Success { .. }));

        assert!(registry.get(TaskType::Publish).is_none());
    }

    #[tokio::test]
    async fn handoff_handler_always_hands_off() {
        let outcome = HandoffHandler.run(&fake_task(TaskType::GenerateUpload)).await;
        assert!(matches!(outcome, Outcome::Handoff));
    }
}
