//! Static process configuration, loaded once at startup.
//!
//! Runtime-tunable scheduling/admission knobs (quotas, durations, grace
//! periods) are **not** here -- those live in [`crate::config::cache`] and
//! can change without a restart. This struct only holds what a process
//! needs to come up: where the database is, what port to bind, how to log.

pub mod cache;

use serde::Deserialize;
use std::time::Duration;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds to wait for in-flight requests/timers to drain on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Scheduler tick cadence in seconds (§4.D recommends once per minute).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// HMAC-SHA256 secret used to validate meeting link tokens (§6).
    pub link_token_secret: String,
}

impl Config {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
