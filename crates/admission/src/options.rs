//! Limiter configuration.
//!
//! Options can be embedded in a host's serde config or read from the
//! environment:
//! - `ADMISSION_MAX_CONCURRENCY` (required): concurrent admissions
//! - `ADMISSION_QUEUE_LIMIT`: waiters kept before rejecting (default 5000)
//! - `ADMISSION_POLICY`: `stack` (default) or `fifo`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_MAX_CONCURRENCY: &str = "ADMISSION_MAX_CONCURRENCY";
pub const ENV_QUEUE_LIMIT: &str = "ADMISSION_QUEUE_LIMIT";
pub const ENV_POLICY: &str = "ADMISSION_POLICY";

pub const DEFAULT_QUEUE_LIMIT: usize = 5000;

/// Order in which queued callers are admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Newest waiter first
    #[default]
    Stack,
    /// Oldest waiter first
    Fifo,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stack => "stack",
            Self::Fifo => "fifo",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stack" | "lifo" => Ok(Self::Stack),
            "fifo" | "queue" => Ok(Self::Fifo),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

fn default_queue_limit() -> usize {
    DEFAULT_QUEUE_LIMIT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterOptions {
    /// Callers admitted concurrently. Must be at least 1.
    pub max_concurrent_requests: usize,
    /// Callers kept waiting before new arrivals are rejected. 0 disables queueing.
    #[serde(default = "default_queue_limit")]
    pub request_queue_limit: usize,
    #[serde(default)]
    pub policy: PolicyKind,
}

impl LimiterOptions {
    pub fn new(max_concurrent_requests: usize) -> Self {
        Self {
            max_concurrent_requests,
            request_queue_limit: DEFAULT_QUEUE_LIMIT,
            policy: PolicyKind::default(),
        }
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.request_queue_limit = limit;
        self
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }

    /// Read options from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`, keyed by the `ADMISSION_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max = lookup(ENV_MAX_CONCURRENCY).ok_or(ConfigError::Missing {
            key: ENV_MAX_CONCURRENCY,
        })?;
        let mut options = Self::new(parse_count(ENV_MAX_CONCURRENCY, &max)?);

        if let Some(limit) = lookup(ENV_QUEUE_LIMIT) {
            options.request_queue_limit = parse_count(ENV_QUEUE_LIMIT, &limit)?;
        }
        if let Some(policy) = lookup(ENV_POLICY) {
            options.policy = policy.parse()?;
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_count(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
