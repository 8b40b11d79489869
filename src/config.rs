//! Configuration for Archway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::CacheConfig;
use crate::faults::FaultLogConfig;
use crate::health::HealthConfig;
use crate::orchestrator::GatewayConfig;
use crate::queue::QueueConfig;

/// Archway - adaptive client gateway for a remote rewriting proxy
#[derive(Parser, Debug, Clone)]
#[command(name = "archway")]
#[command(about = "Fetch resources through a remote rewriting proxy with caching, scheduling and fallback")]
pub struct Args {
    /// Unique instance identifier
    #[arg(long, env = "INSTANCE_ID", default_value_t = Uuid::new_v4())]
    pub instance_id: Uuid,

    /// Base URL of the remote rewriting proxy
    #[arg(long, env = "PROXY_ORIGIN", default_value = "http://localhost:8080")]
    pub proxy_origin: String,

    /// Maximum concurrently executing requests
    #[arg(long, env = "MAX_CONCURRENT", default_value = "6")]
    pub max_concurrent: usize,

    /// Maximum entries in the response cache
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "500")]
    pub cache_max_entries: usize,

    /// Re-attempt failed proxied requests directly against the origin
    #[arg(long, env = "FALLBACK_ENABLED", default_value = "true")]
    pub fallback_enabled: bool,

    /// Path of the JSON state file (omit for in-memory state)
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Floor for the adaptive health-probe interval in seconds
    #[arg(long, env = "HEALTH_MIN_INTERVAL_SECS", default_value = "30")]
    pub health_min_interval_secs: u64,

    /// Ceiling for the adaptive health-probe interval in seconds
    #[arg(long, env = "HEALTH_MAX_INTERVAL_SECS", default_value = "300")]
    pub health_max_interval_secs: u64,

    /// Deadline for a single health probe in seconds
    #[arg(long, env = "HEALTH_PROBE_TIMEOUT_SECS", default_value = "5")]
    pub health_probe_timeout_secs: u64,

    /// Deadline for the connectivity probe during enable, in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "10")]
    pub connect_timeout_secs: u64,

    /// Maximum entries in the rolling error log
    #[arg(long, env = "ERROR_LOG_MAX_ENTRIES", default_value = "200")]
    pub error_log_max_entries: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Target URLs to fetch through the proxy
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("MAX_CONCURRENT must be at least 1".to_string());
        }
        if self.cache_max_entries == 0 {
            return Err("CACHE_MAX_ENTRIES must be at least 1".to_string());
        }
        if self.health_min_interval_secs > self.health_max_interval_secs {
            return Err(
                "HEALTH_MIN_INTERVAL_SECS must be less than or equal to HEALTH_MAX_INTERVAL_SECS"
                    .to_string(),
            );
        }
        if !self.proxy_origin.starts_with("http://") && !self.proxy_origin.starts_with("https://") {
            return Err("PROXY_ORIGIN must be an http(s) URL".to_string());
        }
        Ok(())
    }

    /// Assemble the gateway configuration from the flags
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            origin: self.proxy_origin.clone(),
            fallback_enabled: self.fallback_enabled,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            cache: CacheConfig {
                max_entries: self.cache_max_entries,
            },
            queue: QueueConfig {
                max_concurrent: self.max_concurrent,
            },
            health: HealthConfig {
                min_interval: Duration::from_secs(self.health_min_interval_secs),
                max_interval: Duration::from_secs(self.health_max_interval_secs),
                initial_interval: Duration::from_secs(
                    self.health_min_interval_secs
                        .max(60)
                        .min(self.health_max_interval_secs),
                ),
                probe_timeout: Duration::from_secs(self.health_probe_timeout_secs),
            },
            faults: FaultLogConfig {
                max_entries: self.error_log_max_entries,
            },
            ..GatewayConfig::default()
        }
    }
}
