//! Server wiring for KIMI: configuration and the top-level router.

use std::{path::PathBuf, time::Duration};

use axum::{Router, routing::get};
use kimi_api::AppState;
use kimi_monitor::{MonitorConfig, RetryPolicy};
use kimi_store_sqlite::SqliteStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and `KIMI_*`
/// environment variables. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                     String,
  pub port:                     u16,
  pub store_path:               PathBuf,
  pub retry_max_attempts:       u32,
  pub retry_initial_backoff_ms: u64,
  /// Battery percentage below which a low-battery alert is raised.
  pub low_battery_threshold:    u8,
  /// Buffer size of the fix and alert hubs; slower consumers see a gap.
  pub feed_capacity:            usize,
  /// Seconds without a fix after which a subject's worker is retired.
  pub worker_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    let monitor = MonitorConfig::default();
    Self {
      host:                     "127.0.0.1".to_string(),
      port:                     8080,
      store_path:               PathBuf::from("~/.local/share/kimi/kimi.db"),
      retry_max_attempts:       monitor.retry.max_attempts,
      retry_initial_backoff_ms: monitor.retry.initial_backoff.as_millis() as u64,
      low_battery_threshold:    monitor.low_battery_threshold,
      feed_capacity:            1024,
      worker_idle_timeout_secs: monitor.worker_idle_timeout.as_secs(),
    }
  }
}

impl ServerConfig {
  pub fn monitor_config(&self) -> MonitorConfig {
    MonitorConfig {
      retry:                 RetryPolicy::new(
        self.retry_max_attempts,
        Duration::from_millis(self.retry_initial_backoff_ms),
      ),
      low_battery_threshold: self.low_battery_threshold,
      worker_idle_timeout:   Duration::from_secs(self.worker_idle_timeout_secs),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full HTTP surface: the JSON API under `/api` plus a health check.
pub fn router(state: AppState<SqliteStore>) -> Router {
  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", kimi_api::api_router(state))
    .layer(TraceLayer::new_for_http())
}
