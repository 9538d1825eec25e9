//! Song records and their pipeline-status store.
//!
//! `status` is written only by pipeline actors (in-process handlers, or the
//! external helper through its dedicated progress endpoint). Operator
//! corrections live in the separate `status_override` column and never
//! clobber the pipeline's own view.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;

use crate::storage::{now_ts, StoreError};

/// Pipeline position of a song, from intake to published video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SongStatus {
    Pending,
    Uploading,
    Generating,
    Downloaded,
    Evaluated,
    Published,
    Failed,
}

impl SongStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SongStatus::Pending => "pending",
            SongStatus::Uploading => "uploading",
            SongStatus::Generating => "generating",
            SongStatus::Downloaded => "downloaded",
            SongStatus::Evaluated => "evaluated",
            SongStatus::Published => "published",
            SongStatus::Failed => "failed",
        }
    }

    /// Statuses the external helper may report. The rest belong to
    /// in-process handlers (`evaluated`, `published`) or to intake.
    pub fn helper_reportable(&self) -> bool {
        matches!(
            self,
            SongStatus::Uploading
                | SongStatus::Generating
                | SongStatus::Downloaded
                | SongStatus::Failed
        )
    }
}

impl fmt::Display for SongStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SongStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SongStatus::Pending),
            "uploading" => Ok(SongStatus::Uploading),
            "generating" => Ok(SongStatus::Generating),
            "downloaded" => Ok(SongStatus::Downloaded),
            "evaluated" => Ok(SongStatus::Evaluated),
            "published" => Ok(SongStatus::Published),
            "failed" => Ok(SongStatus::Failed),
            other => Err(format!("unknown song status: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub genre: String,
    /// Pipeline-derived status. Never edited by operators directly.
    pub status: SongStatus,
    /// Operator correction. When set, wins over `status` for display and
    /// for the producer-endpoint guards.
    pub status_override: Option<SongStatus>,
    pub audio_path: Option<String>,
    pub video_id: Option<String>,
    pub quality_score: Option<f64>,
    pub approved: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Song {
    pub fn effective_status(&self) -> SongStatus {
        self.status_override.unwrap_or(self.status)
    }
}

/// Song persistence over the shared pool.
#[derive(Debug, Clone)]
pub struct SongStore {
    pool: SqlitePool,
}

impl SongStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a song. Fails with `Conflict` when the id is taken.
    pub async fn create(&self, id: &str, title: &str, genre: &str) -> Result<Song, StoreError> {
        let now = now_ts();
        let result = sqlx::query_as::<_, Song>(
            "INSERT INTO songs (id, title, genre, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
             RETURNING *",
        )
        .bind(id)
        .bind(title)
        .bind(genre)
        .bind(now)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(song) => Ok(song),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Song>, StoreError> {
        let song = sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    /// Advance the pipeline-derived status.
    pub async fn set_pipeline_status(
        &self,
        id: &str,
        status: SongStatus,
    ) -> Result<Song, StoreError> {
        let song = sqlx::query_as::<_, Song>(
            "UPDATE songs SET status = ?1, updated_at = ?2 WHERE id = ?3 RETURNING *",
        )
        .bind(status)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        song.ok_or(StoreError::NotFound)
    }

    /// Set or clear the operator override without touching `status`.
    pub async fn set_override(
        &self,
        id: &str,
        status: Option<SongStatus>,
    ) -> Result<Song, StoreError> {
        let song = sqlx::query_as::<_, Song>(
            "UPDATE songs SET status_override = ?1, updated_at = ?2 WHERE id = ?3 RETURNING *",
        )
        .bind(status)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        song.ok_or(StoreError::NotFound)
    }

    /// Record where the generated audio landed and move the song to
    /// `downloaded`, making it eligible for evaluation.
    pub async fn record_download(&self, id: &str, audio_path: &str) -> Result<Song, StoreError> {
        let song = sqlx::query_as::<_, Song>(
            "UPDATE songs SET audio_path = ?1, status = 'downloaded', updated_at = ?2
              WHERE id = ?3
              RETURNING *",
        )
        .bind(audio_path)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        song.ok_or(StoreError::NotFound)
    }

    /// Store the analyzer verdict and move the song to `evaluated`.
    pub async fn record_evaluation(
        &self,
        id: &str,
        quality_score: f64,
        approved: bool,
    ) -> Result<Song, StoreError> {
        let song = sqlx::query_as::<_, Song>(
            "UPDATE songs
                SET quality_score = ?1, approved = ?2, status = 'evaluated', updated_at = ?3
              WHERE id = ?4
              RETURNING *",
        )
        .bind(quality_score)
        .bind(approved)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        song.ok_or(StoreError::NotFound)
    }

    /// Store the published video id and move the song to `published`.
    pub async fn record_publish(&self, id: &str, video_id: &str) -> Result<Song, StoreError> {
        let song = sqlx::query_as::<_, Song>(
            "UPDATE songs SET video_id = ?1, status = 'published', updated_at = ?2
              WHERE id = ?3
              RETURNING *",
        )
        .bind(video_id)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        song.ok_or(StoreError::NotFound)
    }
}
