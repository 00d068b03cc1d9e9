//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `config.toml` of an Autoflow data
//! directory. Every section and field has a default, so an empty or missing
//! file yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.autoflow/config.toml` (or `$AUTOFLOW_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetrySettings,
    pub browser: BrowserSettings,
    pub guard: GuardSettings,
    pub sandbox: SandboxSettings,
    pub scheduler: SchedulerSettings,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

/// Global limits applied to every retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Upper bound on any single backoff delay.
    pub max_retry_delay_ms: u64,
    /// Symmetric jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_delay_ms: 300_000,
            jitter_ratio: 0.1,
        }
    }
}

/// Browser session pool limits and driver launch options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub max_sessions_per_owner: usize,
    pub memory_sample_interval_secs: u64,
    pub memory_sweep_interval_secs: u64,
    /// Aggregate threshold is this value times the live session count.
    pub memory_limit_per_session_mb: u64,
    /// Share of sessions (oldest first) closed when memory is over the limit.
    pub evict_fraction: f64,
    pub idle_sweep_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub launch_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Executable speaking the line-delimited JSON driver protocol.
    pub driver_command: String,
    pub driver_args: Vec<String>,
    /// URL substrings the driver refuses to load (ads, trackers).
    pub blocked_url_patterns: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_sessions_per_owner: 10,
            memory_sample_interval_secs: 10,
            memory_sweep_interval_secs: 30,
            memory_limit_per_session_mb: 512,
            evict_fraction: 0.3,
            idle_sweep_interval_secs: 60,
            idle_timeout_secs: 30 * 60,
            launch_timeout_ms: 30_000,
            operation_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            viewport_width: 1280,
            viewport_height: 720,
            driver_command: "autoflow-browser-driver".to_string(),
            driver_args: Vec::new(),
            blocked_url_patterns: [
                "doubleclick.net",
                "googlesyndication.com",
                "google-analytics.com",
                "googletagmanager.com",
                "facebook.net",
                "adservice.",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Circuit breaker, rate limiter and cache defaults for external services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub rate_limit_per_sec: u32,
    /// How long calls are refused once the bucket runs dry.
    pub rate_limit_block_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            rate_limit_per_sec: 4,
            rate_limit_block_secs: 60,
            cache_ttl_secs: 300,
        }
    }
}

/// Limits for user-supplied expressions in filter and action steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub max_expression_len: usize,
    pub max_records: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_expression_len: 4096,
            max_records: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// When false, `serve` does not arm cron timers (webhooks still route).
    pub enabled: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Paths relative to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_file: String,
    /// Root of the file store used by file sources, destinations and actions.
    pub files_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_file: "autoflow.db".to_string(),
            files_dir: "files".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json_logs: bool,
    pub otel: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry.max_retry_delay_ms, 300_000);
        assert_eq!(config.browser.max_sessions_per_owner, 10);
        assert_eq!(config.browser.idle_timeout_secs, 1800);
        assert_eq!(config.guard.failure_threshold, 5);
        assert_eq!(config.guard.rate_limit_per_sec, 4);
        assert_eq!(config.server.port, 8080);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let toml_str = r#"
[browser]
max_sessions_per_owner = 3
driver_command = "/usr/local/bin/driver"

[guard]
recovery_timeout_secs = 10
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.browser.max_sessions_per_owner, 3);
        assert_eq!(config.browser.driver_command, "/usr/local/bin/driver");
        assert_eq!(config.browser.memory_limit_per_session_mb, 512);
        assert_eq!(config.guard.recovery_timeout_secs, 10);
        assert_eq!(config.guard.failure_threshold, 5);
        assert!(!config.browser.blocked_url_patterns.is_empty());
    }
}
