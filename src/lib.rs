// SPDX-License-Identifier: MIT
//! songflowd — song pipeline automation daemon.
//!
//! A song moves through upload → generation → download → evaluation →
//! publish, each stage performed by an external collaborator. The daemon's
//! core is the task queue and worker pool that sequences those stages,
//! retries transient failures, and hands the browser-automation stages off
//! to an out-of-process helper over REST.

pub mod config;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod rest;
pub mod songs;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use config::DaemonConfig;
use notify::Notifier;
use pipeline::collab::Collaborators;
use queue::{HandlerRegistry, TaskStore, WorkerPool};
use songs::SongStore;
use storage::Storage;

/// Shared application state, built once in main and passed as `Arc` to the
/// REST layer and the worker pool. Tests build their own instances.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Storage,
    pub tasks: Arc<TaskStore>,
    pub songs: Arc<SongStore>,
    pub registry: Arc<HandlerRegistry>,
    pub notifier: Arc<Notifier>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Open storage, run migrations, and wire stores, collaborators and the
    /// handler registry from config.
    pub async fn build(config: DaemonConfig) -> Result<Arc<Self>> {
        let storage = Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?;
        let tasks = Arc::new(TaskStore::new(storage.pool()));
        let songs = Arc::new(SongStore::new(storage.pool()));
        let collaborators = Collaborators::from_config(&config.collaborators)?;
        let notifier = Arc::new(Notifier::new(config.notify.webhook_url.clone()));
        let registry = Arc::new(pipeline::build_registry(
            Arc::clone(&tasks),
            Arc::clone(&songs),
            collaborators,
            Arc::clone(&notifier),
            &config.pipeline,
        ));
        Ok(Arc::new(Self {
            config: Arc::new(config),
            storage,
            tasks,
            songs,
            registry,
            notifier,
            started_at: std::time::Instant::now(),
        }))
    }

    /// Launch the worker pool with the configured count, poll interval and
    /// retry budget. The caller owns the returned pool and must `stop` it.
    pub fn start_workers(&self) -> WorkerPool {
        WorkerPool::start(
            self.config.worker.count,
            Arc::clone(&self.tasks),
            Arc::clone(&self.registry),
            Duration::from_secs(self.config.worker.check_interval_secs),
            self.config.worker.max_retries,
        )
    }
}
