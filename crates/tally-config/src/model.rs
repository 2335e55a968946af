// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Tally message engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Tally configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    /// Polling, dedup and reconciliation settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chat-automation backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Downstream classifier settings.
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Ledger storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// How a previously initialized target is resumed on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeMode {
    /// Align the last known sequence with the fresh snapshot and process
    /// only what arrived after the aligned window.
    #[default]
    Reconcile,
    /// Treat everything visible at start as already seen.
    SkipBacklog,
}

/// Engine behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between poll ticks for newly added targets.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after a failed tick before polling again.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Downstream attempts per message before it stays failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Baseline seeding attempts before the target is marked as errored.
    #[serde(default = "default_seed_max_attempts")]
    pub seed_max_attempts: u32,

    /// Base delay between seeding attempts; attempt `n` waits `n * delay`.
    #[serde(default = "default_seed_retry_delay_secs")]
    pub seed_retry_delay_secs: u64,

    /// More new messages than this in one tick is treated as an anomaly.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: usize,

    /// Number of most recent messages kept when a burst is trimmed.
    #[serde(default = "default_burst_keep")]
    pub burst_keep: usize,

    /// Minimum pairwise equality ratio for a reconciliation window.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Largest window length tried by the reconciler.
    #[serde(default = "default_reconcile_window")]
    pub reconcile_window: usize,

    /// Smallest window length tried by the reconciler.
    #[serde(default = "default_reconcile_min_window")]
    pub reconcile_min_window: usize,

    /// Tail offsets searched per side for each window length.
    #[serde(default = "default_reconcile_max_offsets")]
    pub reconcile_max_offsets: usize,

    /// Time budget for one reconciliation.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// Lookback used to rebuild dedup state after a restart.
    #[serde(default = "default_recency_window_hours")]
    pub recency_window_hours: u64,

    /// Width of the wall-clock bucket mixed into content fingerprints.
    #[serde(default = "default_time_bucket_minutes")]
    pub time_bucket_minutes: u32,

    /// Seconds to wait for a poll loop to exit on stop.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Resume behavior for targets that were already initialized.
    #[serde(default)]
    pub resume_mode: ResumeMode,

    /// Substrings identifying the engine's own replies echoed back as
    /// counterparty messages.
    #[serde(default = "default_self_reply_markers")]
    pub self_reply_markers: Vec<String>,

    /// Targets added and started by `tally serve`.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            max_retries: default_max_retries(),
            seed_max_attempts: default_seed_max_attempts(),
            seed_retry_delay_secs: default_seed_retry_delay_secs(),
            burst_limit: default_burst_limit(),
            burst_keep: default_burst_keep(),
            similarity_threshold: default_similarity_threshold(),
            reconcile_window: default_reconcile_window(),
            reconcile_min_window: default_reconcile_min_window(),
            reconcile_max_offsets: default_reconcile_max_offsets(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            recency_window_hours: default_recency_window_hours(),
            time_bucket_minutes: default_time_bucket_minutes(),
            stop_timeout_secs: default_stop_timeout_secs(),
            resume_mode: ResumeMode::default(),
            self_reply_markers: default_self_reply_markers(),
            targets: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn seed_retry_delay(&self) -> Duration {
        Duration::from_secs(self.seed_retry_delay_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_hours * 3600)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_seed_max_attempts() -> u32 {
    10
}

fn default_seed_retry_delay_secs() -> u64 {
    3
}

fn default_burst_limit() -> usize {
    10
}

fn default_burst_keep() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_reconcile_window() -> usize {
    20
}

fn default_reconcile_min_window() -> usize {
    3
}

fn default_reconcile_max_offsets() -> usize {
    10
}

fn default_reconcile_timeout_secs() -> u64 {
    10
}

fn default_recency_window_hours() -> u64 {
    24
}

fn default_time_bucket_minutes() -> u32 {
    5
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_self_reply_markers() -> Vec<String> {
    [
        "✅ 记账成功！",
        "📝 明细：",
        "❌ 记账失败",
        "信息与记账无关",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Chat-automation backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Value for the `X-API-Key` header. `None` sends no key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout for listen and fetch calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-request timeout for send calls.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * backoff_base_ms`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

/// Downstream classifier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerConfig {
    /// Base URL of the classifier service. `None` disables dispatch.
    #[serde(default)]
    pub server_url: Option<String>,

    /// Bearer token for the classifier service.
    #[serde(default)]
    pub token: Option<String>,

    /// Account book the classified records are filed under.
    #[serde(default)]
    pub account_book_id: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_handler_timeout_secs")]
    pub timeout_secs: u64,

    /// Substrings in a response that mean "unrelated message".
    #[serde(default = "default_unrelated_markers")]
    pub unrelated_markers: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            token: None,
            account_book_id: None,
            timeout_secs: default_handler_timeout_secs(),
            unrelated_markers: default_unrelated_markers(),
        }
    }
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_unrelated_markers() -> Vec<String> {
    [
        "信息与记账无关",
        "消息与记账无关",
        "无法识别记账信息",
        "不是记账相关消息",
        "非记账消息",
        "无记账内容",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Age in days after which processed records are eligible for cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("tally").join("tally.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("tally.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}
