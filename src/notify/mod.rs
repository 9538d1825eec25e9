//! Outbound webhook notifications for pipeline milestones.
//!
//! Delivery is best-effort: failures are logged and dropped, never surfaced
//! to the worker. With no webhook URL configured the notifier is inert.

use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Notifier {
    target: Option<(reqwest::Client, String)>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let target = webhook_url.and_then(|url| {
            match reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build() {
                Ok(client) => Some((client, url)),
                Err(e) => {
                    warn!(err = %e, "failed to build webhook client, notifications disabled");
                    None
                }
            }
        });
        Self { target }
    }

    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Post one event to the configured webhook. No-op when unconfigured.
    pub async fn send(&self, event: &str, song_id: &str, detail: Value) {
        let Some((client, url)) = &self.target else {
            return;
        };
        let payload = json!({
            "event": event,
            "song_id": song_id,
            "timestamp": Utc::now().to_rfc3339(),
            "detail": detail,
        });
        match client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(event, song_id, "webhook delivered");
            }
            Ok(resp) => {
                warn!(event, song_id, status = %resp.status(), "webhook rejected");
            }
            Err(e) => {
                warn!(event, song_id, err = %e, "webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_swallows_events() {
        let notifier = Notifier::disabled();
        // Must return immediately without attempting any network call.
        notifier
            .send("song.evaluated", "song-1", json!({"approved": true}))
            .await;
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_error() {
        // Port 9 (discard) refuses connections; send must only log.
        let notifier = Notifier::new(Some("http://127.0.0.1:9/hooks".into()));
        notifier.send("song.published", "song-1", json!({})).await;
    }
}
