// SPDX-License-Identifier: MIT
//! Collaborator seams for the evaluate and publish stages.
//!
//! The dispatcher never does media work itself: audio analysis, video
//! rendering and publishing are HTTP services. Each seam is a trait so
//! tests can script verdicts without a network.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CollaboratorsConfig;

/// Collaborator calls do real media work; give them room before the
/// client-side timeout turns an attempt into a retry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How a collaborator call failed. `Unconfigured` is permanent and maps to
/// a terminal task failure; everything else is worth a retry.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("{0} collaborator is not configured")]
    Unconfigured(&'static str),
    #[error("{0}")]
    Failed(String),
}

impl From<reqwest::Error> for CollabError {
    fn from(e: reqwest::Error) -> Self {
        CollabError::Failed(e.to_string())
    }
}

/// Analyzer verdict for one downloaded audio file.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioReport {
    pub quality_score: f64,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishReceipt {
    pub video_id: String,
}

#[async_trait]
pub trait SongAnalyzer: Send + Sync {
    /// Score the audio file. The caller decides approval against its own
    /// threshold; the analyzer only measures.
    async fn analyze(&self, song_id: &str, audio_path: &str) -> Result<AudioReport, CollabError>;
}

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Render the song's video and return the rendered file's path.
    async fn render(&self, song_id: &str, audio_path: &str) -> Result<String, CollabError>;
}

#[async_trait]
pub trait SongPublisher: Send + Sync {
    async fn publish(
        &self,
        song_id: &str,
        title: &str,
        genre: &str,
        video_path: &str,
    ) -> Result<PublishReceipt, CollabError>;
}

// ─── HTTP implementations ─────────────────────────────────────────────────────

fn build_client() -> Result<reqwest::Client, anyhow::Error> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

pub struct HttpAnalyzer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAnalyzer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client()?,
        })
    }
}

#[async_trait]
impl SongAnalyzer for HttpAnalyzer {
    async fn analyze(&self, song_id: &str, audio_path: &str) -> Result<AudioReport, CollabError> {
        let resp = self
            .client
            .post(endpoint(&self.base_url, "analyze"))
            .json(&serde_json::json!({
                "song_id": song_id,
                "audio_path": audio_path,
            }))
            .send()
            .await?
            .error_for_status()?;
        let report: AudioReport = resp.json().await?;
        Ok(report)
    }
}

pub struct HttpRenderer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client()?,
        })
    }
}

#[derive(Deserialize)]
struct RenderResponse {
    video_path: String,
}

#[async_trait]
impl VideoRenderer for HttpRenderer {
    async fn render(&self, song_id: &str, audio_path: &str) -> Result<String, CollabError> {
        let resp = self
            .client
            .post(endpoint(&self.base_url, "render"))
            .json(&serde_json::json!({
                "song_id": song_id,
                "audio_path": audio_path,
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: RenderResponse = resp.json().await?;
        Ok(body.video_path)
    }
}

pub struct HttpPublisher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPublisher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client()?,
        })
    }
}

#[async_trait]
impl SongPublisher for HttpPublisher {
    async fn publish(
        &self,
        song_id: &str,
        title: &str,
        genre: &str,
        video_path: &str,
    ) -> Result<PublishReceipt, CollabError> {
        let resp = self
            .client
            .post(endpoint(&self.base_url, "publish"))
            .json(&serde_json::json!({
                "song_id": song_id,
                "title": title,
                "genre": genre,
                "video_path": video_path,
            }))
            .send()
            .await?
            .error_for_status()?;
        let receipt: PublishReceipt = resp.json().await?;
        Ok(receipt)
    }
}

// ─── Unconfigured stand-in ────────────────────────────────────────────────────

/// Used when a collaborator URL is absent from config. Every call fails
/// with `Unconfigured`, which handlers turn into a terminal task failure
/// rather than burning the retry budget on an impossible stage.
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl SongAnalyzer for Unconfigured {
    async fn analyze(&self, _song_id: &str, _audio_path: &str) -> Result<AudioReport, CollabError> {
        Err(CollabError::Unconfigured(self.0))
    }
}

#[async_trait]
impl VideoRenderer for Unconfigured {
    async fn render(&self, _song_id: &str, _audio_path: &str) -> Result<String, CollabError> {
        Err(CollabError::Unconfigured(self.0))
    }
}

#[async_trait]
impl SongPublisher for Unconfigured {
    async fn publish(
        &self,
        _song_id: &str,
        _title: &str,
        _genre: &str,
        _video_path: &str,
    ) -> Result<PublishReceipt, CollabError> {
        Err(CollabError::Unconfigured(self.0))
    }
}

// ─── Wiring ───────────────────────────────────────────────────────────────────

/// The three collaborator handles the pipeline handlers share.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn SongAnalyzer>,
    pub renderer: Arc<dyn VideoRenderer>,
    pub publisher: Arc<dyn SongPublisher>,
}

impl Collaborators {
    /// Build production collaborators from config. Missing URLs become
    /// `Unconfigured` stand-ins.
    pub fn from_config(cfg: &CollaboratorsConfig) -> Result<Self, anyhow::Error> {
        let analyzer: Arc<dyn SongAnalyzer> = match &cfg.analyzer_url {
            Some(url) => Arc::new(HttpAnalyzer::new(url.clone())?),
            None => Arc::new(Unconfigured("analyzer")),
        };
        let renderer: Arc<dyn VideoRenderer> = match &cfg.renderer_url {
            Some(url) => Arc::new(HttpRenderer::new(url.clone())?),
            None => Arc::new(Unconfigured("renderer")),
        };
        let publisher: Arc<dyn SongPublisher> = match &cfg.publisher_url {
            Some(url) => Arc::new(HttpPublisher::new(url.clone())?),
            None => Arc::new(Unconfigured("publisher")),
        };
        Ok(Self {
            analyzer,
            renderer,
            publisher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_collaborators_fail_permanently() {
        let stub = Unconfigured("analyzer");
        let err = stub.analyze("song-1", "/tmp/a.mp3").await.unwrap_err();
        assert!(matches!(err, CollabError::Unconfigured("analyzer")));
        assert_eq!(err.to_string(), "analyzer collaborator is not configured");
    }

    #[test]
    fn endpoints_tolerate_trailing_slashes() {
        assert_eq!(
            endpoint("http://localhost:8200/", "analyze"),
            "http://localhost:8200/analyze"
        );
        assert_eq!(
            endpoint("http://localhost:8200", "analyze"),
            "http://localhost:8200/analyze"
        );
    }
}
