// SPDX-License-Identifier: MIT
//! Pipeline stage handlers.
//!
//! Handlers are the only code that reads task payload fields or writes song
//! state. The worker stays type-agnostic: it claims, dispatches through the
//! registry built here, and applies whatever outcome comes back.

pub mod collab;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::notify::Notifier;
use crate::queue::handler::{HandlerRegistry, HandoffHandler, Outcome, TaskHandler};
use crate::queue::store::TaskStore;
use crate::queue::{TaskRecord, TaskType};
use crate::songs::{Song, SongStore};
use collab::{CollabError, Collaborators, SongAnalyzer, SongPublisher, VideoRenderer};

/// Look up the task's song, mapping the failure modes onto outcomes: a task
/// without a song or with a dangling id can never succeed, while a store
/// error is worth another attempt.
async fn load_song(songs: &SongStore, task: &TaskRecord) -> Result<Song, Outcome> {
    let Some(song_id) = task.song_id.as_deref() else {
        return Err(Outcome::Fatal(format!(
            "{} task has no song id",
            task.task_type
        )));
    };
    match songs.get(song_id).await {
        Ok(Some(song)) => Ok(song),
        Ok(None) => Err(Outcome::Fatal(format!("song '{song_id}' not found"))),
        Err(e) => Err(Outcome::Retryable(format!("song lookup failed: {e}"))),
    }
}

fn collab_outcome(err: CollabError) -> Outcome {
    match err {
        CollabError::Unconfigured(_) => Outcome::Fatal(err.to_string()),
        CollabError::Failed(_) => Outcome::Retryable(err.to_string()),
    }
}

// ─── Evaluate ─────────────────────────────────────────────────────────────────

/// Scores downloaded audio and gates the publish stage. An approved verdict
/// chains a `publish` task for the same song.
pub struct EvaluateHandler {
    songs: Arc<SongStore>,
    analyzer: Arc<dyn SongAnalyzer>,
    notifier: Arc<Notifier>,
    min_quality_score: f64,
}

#[async_trait]
impl TaskHandler for EvaluateHandler {
    async fn run(&self, task: &TaskRecord) -> Outcome {
        let song = match load_song(&self.songs, task).await {
            Ok(song) => song,
            Err(outcome) => return outcome,
        };
        let Some(audio_path) = song.audio_path.as_deref() else {
            return Outcome::Fatal(format!(
                "song '{}' has no downloaded audio to evaluate",
                song.id
            ));
        };

        let report = match self.analyzer.analyze(&song.id, audio_path).await {
            Ok(report) => report,
            Err(e) => return collab_outcome(e),
        };
        let approved = report.quality_score >= self.min_quality_score;

        if let Err(e) = self
            .songs
            .record_evaluation(&song.id, report.quality_score, approved)
            .await
        {
            return Outcome::Retryable(format!("failed to store evaluation: {e}"));
        }
        info!(
            song_id = %song.id,
            quality_score = report.quality_score,
            approved,
            "song evaluated"
        );
        self.notifier
            .send(
                "song.evaluated",
                &song.id,
                json!({
                    "quality_score": report.quality_score,
                    "approved": approved,
                }),
            )
            .await;

        Outcome::Success {
            result: Some(json!({
                "quality_score": report.quality_score,
                "approved": approved,
            })),
            next_task: approved.then_some(TaskType::Publish),
        }
    }
}

// ─── Publish ──────────────────────────────────────────────────────────────────

/// Renders the video for an approved song and pushes it out through the
/// publishing service. Refuses unapproved songs outright.
pub struct PublishHandler {
    songs: Arc<SongStore>,
    renderer: Arc<dyn VideoRenderer>,
    publisher: Arc<dyn SongPublisher>,
    notifier: Arc<Notifier>,
}

#[async_trait]
impl TaskHandler for PublishHandler {
    async fn run(&self, task: &TaskRecord) -> Outcome {
        let song = match load_song(&self.songs, task).await {
            Ok(song) => song,
            Err(outcome) => return outcome,
        };
        if song.approved != Some(true) {
            return Outcome::Fatal(format!("song '{}' is not approved for publishing", song.id));
        }
        let Some(audio_path) = song.audio_path.as_deref() else {
            return Outcome::Fatal(format!("song '{}' has no audio to render", song.id));
        };

        let video_path = match self.renderer.render(&song.id, audio_path).await {
            Ok(path) => path,
            Err(e) => return collab_outcome(e),
        };
        let receipt = match self
            .publisher
            .publish(&song.id, &song.title, &song.genre, &video_path)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return collab_outcome(e),
        };

        if let Err(e) = self.songs.record_publish(&song.id, &receipt.video_id).await {
            return Outcome::Retryable(format!("failed to store publish result: {e}"));
        }
        info!(song_id = %song.id, video_id = %receipt.video_id, "song published");
        self.notifier
            .send(
                "song.published",
                &song.id,
                json!({"video_id": receipt.video_id}),
            )
            .await;

        Outcome::Success {
            result: Some(json!({
                "video_id": receipt.video_id,
                "video_path": video_path,
            })),
            next_task: None,
        }
    }
}

// ─── Cleanup ──────────────────────────────────────────────────────────────────

/// Prunes terminal queue records past the retention window.
pub struct CleanupHandler {
    tasks: Arc<TaskStore>,
    retention_days: i64,
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    async fn run(&self, _task: &TaskRecord) -> Outcome {
        match self.tasks.prune_terminal(self.retention_days).await {
            Ok((completed, failed)) => {
                if completed + failed > 0 {
                    info!(completed, failed, "pruned old terminal tasks");
                }
                Outcome::Success {
                    result: Some(json!({
                        "completed_removed": completed,
                        "failed_removed": failed,
                    })),
                    next_task: None,
                }
            }
            Err(e) => Outcome::Retryable(format!("prune failed: {e}")),
        }
    }
}

// ─── Registry wiring ──────────────────────────────────────────────────────────

/// Wire every task type to its stage handler. The generation stages belong
/// to the external helper and are registered as hand-offs.
pub fn build_registry(
    tasks: Arc<TaskStore>,
    songs: Arc<SongStore>,
    collaborators: Collaborators,
    notifier: Arc<Notifier>,
    pipeline: &PipelineConfig,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::GenerateUpload, Arc::new(HandoffHandler));
    registry.register(TaskType::GenerateDownload, Arc::new(HandoffHandler));
    registry.register(
        TaskType::Evaluate,
        Arc::new(EvaluateHandler {
            songs: Arc::clone(&songs),
            analyzer: collaborators.analyzer,
            notifier: Arc::clone(&notifier),
            min_quality_score: pipeline.min_quality_score,
        }),
    );
    registry.register(
        TaskType::Publish,
        Arc::new(PublishHandler {
            songs,
            renderer: collaborators.renderer,
            publisher: collaborators.publisher,
            notifier,
        }),
    );
    registry.register(
        TaskType::Cleanup,
        Arc::new(CleanupHandler {
            tasks,
            retention_days: pipeline.retention_days as i64,
        }),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskStatus;
    use crate::storage::Storage;
    use collab::{AudioReport, PublishReceipt};
    use std::sync::Mutex;

    struct FakeAnalyzer {
        score: f64,
    }

    #[async_trait]
    impl SongAnalyzer for FakeAnalyzer {
        async fn analyze(
            &self,
            _song_id: &str,
            _audio_path: &str,
        ) -> Result<AudioReport, CollabError> {
            Ok(AudioReport {
                quality_score: self.score,
                duration_seconds: Some(180.0),
                sample_rate: Some(44_100),
                bitrate: None,
            })
        }
    }

    struct OfflineAnalyzer;

    #[async_trait]
    impl SongAnalyzer for OfflineAnalyzer {
        async fn analyze(
            &self,
            _song_id: &str,
            _audio_path: &str,
        ) -> Result<AudioReport, CollabError> {
            Err(CollabError::Failed("analyzer offline".into()))
        }
    }

    #[derive(Default)]
    struct FakeRenderer {
        rendered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VideoRenderer for FakeRenderer {
        async fn render(&self, song_id: &str, audio_path: &str) -> Result<String, CollabError> {
            self.rendered.lock().unwrap().push(audio_path.to_string());
            Ok(format!("/videos/{song_id}.mp4"))
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SongPublisher for FakePublisher {
        async fn publish(
            &self,
            _song_id: &str,
            _title: &str,
            _genre: &str,
            video_path: &str,
        ) -> Result<PublishReceipt, CollabError> {
            self.published.lock().unwrap().push(video_path.to_string());
            Ok(PublishReceipt {
                video_id: "yt-001".into(),
            })
        }
    }

    async fn stores() -> (Storage, Arc<TaskStore>, Arc<SongStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let tasks = Arc::new(TaskStore::new(storage.pool().clone()));
        let songs = Arc::new(SongStore::new(storage.pool().clone()));
        (storage, tasks, songs, dir)
    }

    fn task_for(task_type: TaskType, song_id: Option<&str>) -> TaskRecord {
        TaskRecord {
            id: 1,
            task_type,
            song_id: song_id.map(Into::into),
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

    fn evaluate_handler(songs: &Arc<SongStore>, analyzer: Arc<dyn SongAnalyzer>) -> EvaluateHandler {
        EvaluateHandler {
            songs: Arc::clone(songs),
            analyzer,
            notifier: Arc::new(Notifier::disabled()),
            min_quality_score: 70.0,
        }
    }

    #[tokio::test]
    async fn evaluate_approves_and_chains_to_publish() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();

        let handler = evaluate_handler(&songs, Arc::new(FakeAnalyzer { score: 85.0 }));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("song-1"))).await;

        match outcome {
            Outcome::Success { result, next_task } => {
                assert_eq!(next_task, Some(TaskType::Publish));
                let result = result.unwrap();
                assert_eq!(result["approved"], json!(true));
                assert_eq!(result["quality_score"], json!(85.0));
            }
            other => panic!("expected success, got {other:?}"),
        }

        let song = songs.get("song-1").await.unwrap().unwrap();
        assert_eq!(song.quality_score, Some(85.0));
        assert_eq!(song.approved, Some(true));
    }

    #[tokio::test]
    async fn evaluate_below_threshold_stops_the_chain() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();

        let handler = evaluate_handler(&songs, Arc::new(FakeAnalyzer { score: 55.0 }));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("song-1"))).await;

        match outcome {
            Outcome::Success { next_task, .. } => assert_eq!(next_task, None),
            other => panic!("expected success, got {other:?}"),
        }
        let song = songs.get("song-1").await.unwrap().unwrap();
        assert_eq!(song.approved, Some(false));
    }

    #[tokio::test]
    async fn evaluate_without_audio_is_fatal() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();

        let handler = evaluate_handler(&songs, Arc::new(FakeAnalyzer { score: 85.0 }));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("song-1"))).await;
        assert!(matches!(outcome, Outcome::Fatal(msg) if msg.contains("no downloaded audio")));
    }

    #[tokio::test]
    async fn evaluate_unknown_song_is_fatal() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        let handler = evaluate_handler(&songs, Arc::new(FakeAnalyzer { score: 85.0 }));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("ghost"))).await;
        assert!(matches!(outcome, Outcome::Fatal(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn analyzer_outage_is_retryable() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();

        let handler = evaluate_handler(&songs, Arc::new(OfflineAnalyzer));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("song-1"))).await;
        assert!(matches!(outcome, Outcome::Retryable(msg) if msg.contains("analyzer offline")));
    }

    #[tokio::test]
    async fn unconfigured_analyzer_is_fatal() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();

        let handler = evaluate_handler(&songs, Arc::new(collab::Unconfigured("analyzer")));
        let outcome = handler.run(&task_for(TaskType::Evaluate, Some("song-1"))).await;
        assert!(matches!(outcome, Outcome::Fatal(msg) if msg.contains("not configured")));
    }

    #[tokio::test]
    async fn publish_requires_an_approved_song() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();
        songs.record_evaluation("song-1", 40.0, false).await.unwrap();

        let handler = PublishHandler {
            songs: Arc::clone(&songs),
            renderer: Arc::new(FakeRenderer::default()),
            publisher: Arc::new(FakePublisher::default()),
            notifier: Arc::new(Notifier::disabled()),
        };
        let outcome = handler.run(&task_for(TaskType::Publish, Some("song-1"))).await;
        assert!(matches!(outcome, Outcome::Fatal(msg) if msg.contains("not approved")));
    }

    #[tokio::test]
    async fn publish_renders_then_records_the_video() {
        let (_storage, _tasks, songs, _dir) = stores().await;
        songs.create("song-1", "Neon Rain", "synthwave").await.unwrap();
        songs
            .record_download("song-1", "/audio/song-1.mp3")
            .await
            .unwrap();
        songs.record_evaluation("song-1", 85.0, true).await.unwrap();

        let renderer = Arc::new(FakeRenderer::default());
        let publisher = Arc::new(FakePublisher::default());
        let handler = PublishHandler {
            songs: Arc::clone(&songs),
            renderer: Arc::clone(&renderer) as Arc<dyn VideoRenderer>,
            publisher: Arc::clone(&publisher) as Arc<dyn SongPublisher>,
            notifier: Arc::new(Notifier::disabled()),
        };
        let outcome = handler.run(&task_for(TaskType::Publish, Some("song-1"))).await;

        match outcome {
            Outcome::Success { result, next_task } => {
                assert_eq!(next_task, None);
                assert_eq!(result.unwrap()["video_id"], json!("yt-001"));
            }
            other => panic!("expected success, got {other:?}"),
        }
        // Renderer consumed the downloaded audio; publisher got the render.
        assert_eq!(
            renderer.rendered.lock().unwrap().as_slice(),
            ["/audio/song-1.mp3"]
        );
        assert_eq!(
            publisher.published.lock().unwrap().as_slice(),
            ["/videos/song-1.mp4"]
        );

        let song = songs.get("song-1").await.unwrap().unwrap();
        assert_eq!(song.video_id.as_deref(), Some("yt-001"));
    }

    #[tokio::test]
    async fn cleanup_reports_prune_counts() {
        let (storage, tasks, _songs, _dir) = stores().await;
        let old = tasks
            .enqueue(TaskType::Evaluate, None, None, 0, 3)
            .await
            .unwrap();
        tasks.start(old.id).await.unwrap();
        tasks.mark_completed(old.id, None).await.unwrap();
        sqlx::query("UPDATE task_queue SET completed_at = completed_at - 60 * 86400 WHERE id = ?1")
            .bind(old.id)
            .execute(&storage.pool())
            .await
            .unwrap();

        let handler = CleanupHandler {
            tasks: Arc::clone(&tasks),
            retention_days: 30,
        };
        let outcome = handler.run(&task_for(TaskType::Cleanup, None)).await;
        match outcome {
            Outcome::Success { result, .. } => {
                assert_eq!(result.unwrap()["completed_removed"], json!(1));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_covers_every_task_type() {
        let (_storage, tasks, songs, _dir) = stores().await;
        let registry = build_registry(
            tasks,
            songs,
            Collaborators {
                analyzer: Arc::new(FakeAnalyzer { score: 80.0 }),
                renderer: Arc::new(FakeRenderer::default()),
                publisher: Arc::new(FakePublisher::default()),
            },
            Arc::new(Notifier::disabled()),
            &PipelineConfig::default(),
        );
        for task_type in TaskType::ALL {
            assert!(registry.get(task_type).is_some(), "{task_type} unhandled");
        }
    }
}
