//! Structured logging setup and in-process worker counters.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log format options for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format for development (with all fields)
    Pretty,
    #[default]
    Compact,
}

/// Logging configuration.
///
/// ```rust,no_run
/// # use durable_worker::runtime::{ObservabilityConfig, LogFormat, init_tracing};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
/// };
/// init_tracing(&config).unwrap();
/// ```
///
/// `RUST_LOG` overrides the filter derived from `log_level` when set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level for the workflow, activity and runtime targets (e.g., "info", "debug")
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,durable_worker::workflow={level},durable_worker::activity={level},durable_worker::runtime={level}")
}

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}

/// Snapshot of the worker counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub orch_completions: u64,
    pub orch_failures: u64,
    pub orch_continued_as_new: u64,
    pub orch_yields: u64,
    pub orch_not_found: u64,
    pub activity_success: u64,
    pub activity_failures: u64,
    pub activity_not_found: u64,
}

/// Lock-free counters updated by the dispatchers.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    orch_completions: AtomicU64,
    orch_failures: AtomicU64,
    orch_continued_as_new: AtomicU64,
    orch_yields: AtomicU64,
    orch_not_found: AtomicU64,
    activity_success: AtomicU64,
    activity_failures: AtomicU64,
    activity_not_found: AtomicU64,
}

impl WorkerMetrics {
    pub fn record_orchestration_completed(&self) {
        self.orch_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orchestration_failed(&self) {
        self.orch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_continued_as_new(&self) {
        self.orch_continued_as_new.fetch_add(1, Ordering::Relaxed);
    }

    /// A turn that ended with the workflow still waiting.
    pub fn record_orchestration_yielded(&self) {
        self.orch_yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orchestration_not_found(&self) {
        self.orch_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_success(&self) {
        self.activity_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_failure(&self) {
        self.activity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_not_found(&self) {
        self.activity_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orch_completions: self.orch_completions.load(Ordering::Relaxed),
            orch_failures: self.orch_failures.load(Ordering::Relaxed),
            orch_continued_as_new: self.orch_continued_as_new.load(Ordering::Relaxed),
            orch_yields: self.orch_yields.load(Ordering::Relaxed),
            orch_not_found: self.orch_not_found.load(Ordering::Relaxed),
            activity_success: self.activity_success.load(Ordering::Relaxed),
            activity_failures: self.activity_failures.load(Ordering::Relaxed),
            activity_not_found: self.activity_not_found.load(Ordering::Relaxed),
        }
    }
}
