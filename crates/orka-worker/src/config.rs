//! Worker tuning parameters, environment-addressed per `spec.md` §6.

use std::env;
use std::time::Duration;

/// Default empty-poll sleep; not independently configurable in `spec.md` §6,
/// which only bounds it ("≤ 500 ms").
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a lease is held before it is eligible for reaping.
    pub lease_seconds: u64,
    /// Minimum interval between heartbeat upserts.
    pub heartbeat_interval_seconds: u64,
    /// Minimum interval between expired-lease reap sweeps.
    pub cleanup_interval_seconds: u64,
    /// `baseDelay` in the backoff schedule `delay(k) = min(base·2^(k-1), max)`.
    pub backoff_base_seconds: f64,
    /// `maxDelay` in the backoff schedule.
    pub backoff_max_seconds: f64,
    /// Whether to apply multiplicative jitter in `[0.5, 1.0]` to each delay.
    pub backoff_jitter: bool,
    /// How long graceful shutdown waits for the in-flight attempt to finish.
    pub graceful_shutdown_seconds: u64,
    /// Fallback per-step timeout when a step doesn't set its own.
    pub step_default_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            lease_seconds: 60,
            heartbeat_interval_seconds: 30,
            cleanup_interval_seconds: 300,
            backoff_base_seconds: 1.0,
            backoff_max_seconds: 60.0,
            backoff_jitter: true,
            graceful_shutdown_seconds: 30,
            step_default_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    /// Load from environment, falling back to `spec.md` §6 defaults for any
    /// variable that is unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = WorkerConfig::default();
        WorkerConfig {
            lease_seconds: env_or("LEASE_SECONDS", defaults.lease_seconds),
            heartbeat_interval_seconds: env_or(
                "HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval_seconds,
            ),
            cleanup_interval_seconds: env_or(
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_seconds,
            ),
            backoff_base_seconds: env_or("BACKOFF_BASE_SECONDS", defaults.backoff_base_seconds),
            backoff_max_seconds: env_or("BACKOFF_MAX_SECONDS", defaults.backoff_max_seconds),
            backoff_jitter: env_or("BACKOFF_JITTER", defaults.backoff_jitter),
            graceful_shutdown_seconds: env_or(
                "GRACEFUL_SHUTDOWN_SECONDS",
                defaults.graceful_shutdown_seconds,
            ),
            step_default_timeout_seconds: env_or(
                "STEP_DEFAULT_TIMEOUT_SECONDS",
                defaults.step_default_timeout_seconds,
            ),
        }
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_seconds as i64)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
