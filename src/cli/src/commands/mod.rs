//! CLI subcommands.

pub mod job;
pub mod maintenance;
pub mod queue;

use anyhow::{Context as _, Result};
use std::time::Duration;

use mdus_core::config::Config;
use mdus_core::jobs::JobQueue;

/// Loaded configuration plus the queue every command talks to.
pub struct Context {
    pub config: Config,
    pub queue: JobQueue,
}

impl Context {
    pub fn load(path: Option<&str>, redis_url: Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))?,
            None => Config::load().context("Failed to load configuration")?,
        };
        if let Some(url) = redis_url {
            config.redis.url = url;
        }

        let queue = JobQueue::redis(&config.redis, config.processing.retry_attempts)
            .with_context(|| format!("Invalid Redis URL: {}", config.redis.url))?;

        Ok(Self { config, queue })
    }
}

/// Parse `30m`, `7d`, `1h 30m` and the like.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}
