// SPDX-License-Identifier: AGPL-3.0
//! Gateway configuration. Every field is optional at the environment level
//! and falls back to the default the spec enumerates; `from_env` never
//! fails on a missing variable, only on one present but unparsable.

use std::time::Duration;

fn env_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub max_memory_mb: u64,
    pub max_fds: u64,
    pub heartbeat_s: u64,
    pub hung_s: u64,
    pub max_restarts: u32,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 1024,
            max_fds: 1000,
            heartbeat_s: 10,
            hung_s: 15,
            max_restarts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiemConfig {
    pub batch_size: usize,
    pub batch_timeout_s: u64,
    pub queue_max: usize,
    pub retry: u32,
    pub fallback_dir: String,
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_s: 3,
            queue_max: 10_000,
            retry: 3,
            fallback_dir: "./siem-fallback".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub peer_timeout_s: u64,
    pub health_timeout_s: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            peer_timeout_s: 30,
            health_timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub policy_engine_url: String,
    pub session_timeout_seconds: u64,
    pub remember_me_multiplier: u32,
    pub rate_limit_rps: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_seconds: u64,
    pub retry_max_attempts: u32,
    pub stdio: StdioConfig,
    pub siem: SiemConfig,
    pub federation: FederationConfig,
}

impl GatewayConfig {
    /// Reads every field from its environment variable, falling back to the
    /// spec-enumerated default for anything unset. Never panics: a malformed
    /// value silently falls back too, since `from_env` runs at startup
    /// before tracing is initialized and has nowhere safe to report to.
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL", "postgres://localhost/sark"),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            policy_engine_url: env_string("POLICY_ENGINE_URL", "http://localhost:8181"),
            session_timeout_seconds: env_var("SESSION_TIMEOUT_SECONDS", 86_400),
            remember_me_multiplier: env_var("REMEMBER_ME_MULTIPLIER", 30),
            rate_limit_rps: env_var("RATE_LIMIT_RPS", 50.0),
            circuit_failure_threshold: env_var("CIRCUIT_FAILURE_THRESHOLD", 5),
            circuit_recovery_seconds: env_var("CIRCUIT_RECOVERY_SECONDS", 60),
            retry_max_attempts: env_var("RETRY_MAX_ATTEMPTS", 3),
            stdio: StdioConfig {
                max_memory_mb: env_var("STDIO_MAX_MEMORY_MB", 1024),
                max_fds: env_var("STDIO_MAX_FDS", 1000),
                heartbeat_s: env_var("STDIO_HEARTBEAT_S", 10),
                hung_s: env_var("STDIO_HUNG_S", 15),
                max_restarts: env_var("STDIO_MAX_RESTARTS", 3),
            },
            siem: SiemConfig {
                batch_size: env_var("SIEM_BATCH_SIZE", 100),
                batch_timeout_s: env_var("SIEM_BATCH_TIMEOUT_S", 3),
                queue_max: env_var("SIEM_QUEUE_MAX", 10_000),
                retry: env_var("SIEM_RETRY", 3),
                fallback_dir: env_string("SIEM_FALLBACK_DIR", "./siem-fallback"),
            },
            federation: FederationConfig {
                peer_timeout_s: env_var("FEDERATION_PEER_TIMEOUT_S", 30),
                health_timeout_s: env_var("FEDERATION_HEALTH_TIMEOUT_S", 5),
            },
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    pub fn circuit_recovery(&self) -> Duration {
        Duration::from_secs(self.circuit_recovery_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        std::env::remove_var("SESSION_TIMEOUT_SECONDS");
        let config = GatewayConfig::from_env();
        assert_eq!(config.session_timeout_seconds, 86_400);
        assert_eq!(config.remember_me_multiplier, 30);
        assert_eq!(config.siem.queue_max, 10_000);
    }
}
