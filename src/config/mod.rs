use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8100;
const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: i64 = 3;
const DEFAULT_MIN_QUALITY_SCORE: f64 = 70.0;
const DEFAULT_RETENTION_DAYS: u32 = 30;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── WorkerConfig ─────────────────────────────────────────────────────────────

/// Worker pool configuration (`[worker]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers (default: 2).
    pub count: usize,
    /// Seconds a worker sleeps between empty queue polls (default: 60).
    pub check_interval_secs: u64,
    /// Retry budget for newly enqueued tasks; a task survives this many
    /// failures before going terminal (default: 3).
    pub max_retries: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// ─── PipelineConfig ───────────────────────────────────────────────────────────

/// Pipeline thresholds (`[pipeline]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum analyzer quality score for a song to be approved and chained
    /// into the publish stage (default: 70.0).
    pub min_quality_score: f64,
    /// Days to keep completed/failed tasks before the cleanup stage removes
    /// them (default: 30).
    pub retention_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_quality_score: DEFAULT_MIN_QUALITY_SCORE,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

// ─── CollaboratorsConfig ──────────────────────────────────────────────────────

/// External collaborator endpoints (`[collaborators]` in config.toml).
///
/// Every URL is optional. A stage whose collaborator is unconfigured fails
/// its tasks terminally with a "not configured" error instead of retrying.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Audio quality analyzer base URL. Example: `"http://localhost:8200"`.
    pub analyzer_url: Option<String>,
    /// Video renderer base URL.
    pub renderer_url: Option<String>,
    /// Publishing service base URL.
    pub publisher_url: Option<String>,
}

// ─── NotifyConfig ─────────────────────────────────────────────────────────────

/// Webhook notification settings (`[notify]` in config.toml).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook URL receiving pipeline milestone events. None = disabled.
    pub webhook_url: Option<String>,
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST server port (default: 8100).
    port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,songflowd=trace" (default: "info").
    log: Option<String>,
    /// Bind address for the REST server (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Bearer token for the REST API. None = REST auth disabled
    /// (local-only, trusted loopback use).
    api_token: Option<String>,
    /// Worker pool configuration (`[worker]`).
    worker: Option<WorkerConfig>,
    /// Pipeline thresholds (`[pipeline]`).
    pipeline: Option<PipelineConfig>,
    /// External collaborator endpoints (`[collaborators]`).
    collaborators: Option<CollaboratorsConfig>,
    /// Webhook notification settings (`[notify]`).
    notify: Option<NotifyConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Bind address for the REST server (SONGFLOWD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Log output format: "pretty" (default) | "json" (structured for Loki/Elasticsearch).
    pub log_format: String,
    /// Bearer token required to call the REST API.
    /// Set via `SONGFLOWD_API_TOKEN` env var or `api_token` in config.toml.
    /// None = REST authentication disabled (the external helper runs on the
    /// same host by default).
    pub api_token: Option<String>,
    /// Worker pool: count, poll interval, retry budget.
    pub worker: WorkerConfig,
    /// Pipeline thresholds: approval score, retention window.
    pub pipeline: PipelineConfig,
    /// External collaborator endpoints for the evaluate and publish stages.
    pub collaborators: CollaboratorsConfig,
    /// Webhook notification settings.
    pub notify: NotifyConfig,
    /// Observability: slow query threshold.
    pub observability: ObservabilityConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("SONGFLOWD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("SONGFLOWD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let api_token = std::env::var("SONGFLOWD_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_token);

        let worker = toml.worker.unwrap_or_default();
        let pipeline = toml.pipeline.unwrap_or_default();
        let collaborators = toml.collaborators.unwrap_or_default();
        let notify = toml.notify.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            log_format,
            api_token,
            worker,
            pipeline,
            collaborators,
            notify,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/songflowd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("songflowd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/songflowd or ~/.local/share/songflowd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("songflowd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("songflowd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\songflowd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("songflowd");
        }
    }
    // Fallback
    PathBuf::from(".songflowd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.worker.count, 2);
        assert_eq!(cfg.worker.check_interval_secs, 60);
        assert_eq!(cfg.worker.max_retries, 3);
        assert_eq!(cfg.pipeline.min_quality_score, 70.0);
        assert_eq!(cfg.pipeline.retention_days, 30);
        assert!(cfg.collaborators.analyzer_url.is_none());
    }

    #[test]
    fn cli_beats_toml_beats_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
port = 9000
log = "debug"

[worker]
count = 4

[pipeline]
min_quality_score = 55.0
"#,
        )
        .unwrap();

        let cfg = DaemonConfig::new(Some(7100), Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, 7100); // CLI wins
        assert_eq!(cfg.log, "debug"); // TOML wins over default
        assert_eq!(cfg.worker.count, 4);
        assert_eq!(cfg.worker.max_retries, 3); // untouched section field keeps default
        assert_eq!(cfg.pipeline.min_quality_score, 55.0);
    }
}
