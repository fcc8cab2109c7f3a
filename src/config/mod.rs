//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Everything
//! has a default, so an empty environment is a valid configuration.

use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_STORAGE_ROOT: &str = "data/agents";
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_MAX_PADDING: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory for files received from workers.
    pub storage_root: PathBuf,
    /// Pending tasks allowed per worker queue.
    pub queue_capacity: usize,
    /// Upper bound on reply padding, whatever a worker asks for.
    pub max_padding: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_padding: DEFAULT_MAX_PADDING,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            storage_root: lookup("JOBQ_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            queue_capacity: match lookup("JOBQ_QUEUE_CAPACITY") {
                Some(raw) => parse_capacity(&raw)?,
                None => defaults.queue_capacity,
            },
            max_padding: match lookup("JOBQ_MAX_PADDING") {
                Some(raw) => raw.trim().parse().map_err(|e| {
                    Error::Config(format!("JOBQ_MAX_PADDING {raw:?} is not a number: {e}"))
                })?,
                None => defaults.max_padding,
            },
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|v| !v.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_capacity(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(Error::Config("JOBQ_QUEUE_CAPACITY must be positive".to_string())),
        Ok(n) => Ok(n),
        Err(e) => Err(Error::Config(format!(
            "JOBQ_QUEUE_CAPACITY {raw:?} is not a number: {e}"
        ))),
    }
}
