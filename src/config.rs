//! Environment-driven configuration (§10.3).
//!
//! Loaded once at startup via `dotenvy` + `std::env`, validated eagerly, and
//! shared as an immutable `Arc<Config>` across every component. There is no
//! hot-reload of configuration itself — only the log filter is runtime
//! adjustable (`crate::logging::LoggingConfig`).

use crate::broadcast::StreamPrivacy;
use crate::{Error, Result};

/// Timing parameters sent to an agent in `orchestrator.hello.ok` (§4.1 step 6).
#[derive(Debug, Clone, Copy)]
pub struct AgentTimings {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub kill_after_ms: u64,
}

/// The broadcast-platform OAuth triple (§4.6, §6).
#[derive(Debug, Clone, Default)]
pub struct YoutubeOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

/// Application-wide configuration, loaded once and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    pub agent_token: String,

    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub kill_after_ms: u64,

    pub stream_health_interval_ms: u64,
    pub stream_inactive_grace_ms: u64,
    pub restart_backoffs_ms: Vec<u64>,

    pub assign_ack_ttl_ms: u64,
    pub metadata_debounce_ms: u64,

    pub broadcast_rate_limit_window_ms: u64,
    pub broadcast_rate_limit_max: usize,
    pub job_rate_limit_burst: usize,
    pub job_rate_limit_interval_ms: u64,

    pub scheduler_interval_ms: u64,
    pub ui_ws_broadcast_capacity: usize,

    pub disable_youtube_api: bool,
    pub enable_public_access_restrictions: bool,
    pub default_stream_privacy: StreamPrivacy,
    pub youtube: YoutubeOAuthConfig,
    pub oauth_redirect_uri: String,
    pub ui_base_url: String,

    pub log_dir: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::config(format!("invalid {key}={v:?}: {e}"))),
        _ => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::config(format!("invalid {key}={v:?}: {e}"))),
        _ => Ok(default),
    }
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::config(format!("invalid {key}={v:?}: {e}"))),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from the process environment (layered under any
    /// `.env` file the caller has already applied via `dotenvy::dotenv()`).
    ///
    /// Fails fast on malformed duration strings or a missing `AGENT_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let agent_token = env_opt_string("AGENT_TOKEN")
            .ok_or_else(|| Error::config("AGENT_TOKEN must be set"))?;

        Ok(Self {
            bind_address: env_string("BIND_ADDRESS", "0.0.0.0"),
            port: env_u16("PORT", 8080)?,

            agent_token,

            heartbeat_interval_ms: env_u64("HEARTBEAT_INTERVAL_MS", 3_000)?,
            heartbeat_timeout_ms: env_u64("HEARTBEAT_TIMEOUT_MS", 10_000)?,
            stop_grace_ms: env_u64("STOP_GRACE_MS", 10_000)?,
            kill_after_ms: env_u64("KILL_AFTER_MS", 5_000)?,

            stream_health_interval_ms: env_u64("STREAM_HEALTH_INTERVAL_MS", 15_000)?,
            stream_inactive_grace_ms: env_u64("STREAM_INACTIVE_GRACE_MS", 30_000)?,
            restart_backoffs_ms: vec![5_000, 15_000, 45_000],

            assign_ack_ttl_ms: env_u64("ASSIGN_ACK_TTL_MS", 5_000)?,
            metadata_debounce_ms: env_u64("METADATA_DEBOUNCE_MS", 10_000)?,

            broadcast_rate_limit_window_ms: env_u64("BROADCAST_RATE_LIMIT_WINDOW_MS", 600_000)?,
            broadcast_rate_limit_max: env_usize("BROADCAST_RATE_LIMIT_MAX", 10)?,
            job_rate_limit_burst: env_usize("JOB_RATE_LIMIT_BURST", 5)?,
            job_rate_limit_interval_ms: env_u64("JOB_RATE_LIMIT_INTERVAL_MS", 2_000)?,

            scheduler_interval_ms: env_u64("SCHEDULER_INTERVAL_MS", 500)?,
            ui_ws_broadcast_capacity: env_usize("UI_WS_BROADCAST_CAPACITY", 256)?,

            disable_youtube_api: env_bool("DISABLE_YOUTUBE_API", false),
            enable_public_access_restrictions: env_bool("ENABLE_PUBLIC_ACCESS_RESTRICTIONS", false),
            default_stream_privacy: env_opt_string("DEFAULT_STREAM_PRIVACY")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            youtube: YoutubeOAuthConfig {
                client_id: env_opt_string("YOUTUBE_CLIENT_ID"),
                client_secret: env_opt_string("YOUTUBE_CLIENT_SECRET"),
                refresh_token: env_opt_string("YOUTUBE_REFRESH_TOKEN"),
            },
            oauth_redirect_uri: env_string("OAUTH_REDIRECT_URI", "http://localhost:8080/oauth/callback"),
            ui_base_url: env_string("UI_BASE_URL", "/"),

            log_dir: env_string("LOG_DIR", "logs"),
        })
    }

    /// Timing parameters the agent must respect, per `orchestrator.hello.ok`.
    pub fn agent_timings(&self) -> AgentTimings {
        AgentTimings {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            stop_grace_ms: self.stop_grace_ms,
            kill_after_ms: self.kill_after_ms,
        }
    }

    /// A configuration suitable for tests: random-ish high port, short
    /// timers, youtube API disabled (mock client is used instead).
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            agent_token: "T".to_string(),
            heartbeat_interval_ms: 3_000,
            heartbeat_timeout_ms: 10_000,
            stop_grace_ms: 10_000,
            kill_after_ms: 5_000,
            stream_health_interval_ms: 15_000,
            stream_inactive_grace_ms: 30_000,
            restart_backoffs_ms: vec![5_000, 15_000, 45_000],
            assign_ack_ttl_ms: 5_000,
            metadata_debounce_ms: 10_000,
            broadcast_rate_limit_window_ms: 600_000,
            broadcast_rate_limit_max: 10,
            job_rate_limit_burst: 5,
            job_rate_limit_interval_ms: 2_000,
            scheduler_interval_ms: 500,
            ui_ws_broadcast_capacity: 256,
            disable_youtube_api: true,
            enable_public_access_restrictions: false,
            default_stream_privacy: StreamPrivacy::default(),
            youtube: YoutubeOAuthConfig::default(),
            oauth_redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
            ui_base_url: "/".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_agent_token_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("AGENT_TOKEN");
        }
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn agent_token_present_loads_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("AGENT_TOKEN", "secret");
            std::env::remove_var("PORT");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.agent_token, "secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.restart_backoffs_ms, vec![5_000, 15_000, 45_000]);
        unsafe {
            std::env::remove_var("AGENT_TOKEN");
        }
    }

    #[test]
    fn invalid_duration_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("AGENT_TOKEN", "secret");
            std::env::set_var("HEARTBEAT_INTERVAL_MS", "not-a-number");
        }
        assert!(Config::from_env().is_err());
        unsafe {
            std::env::remove_var("AGENT_TOKEN");
            std::env::remove_var("HEARTBEAT_INTERVAL_MS");
        }
    }
}
