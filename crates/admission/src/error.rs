use std::time::Duration;

pub use crate::signal::SignalError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("Request rejected: no slot available and queue full")]
    Rejected,

    #[error("Request cancelled while waiting for a slot")]
    Cancelled,

    #[error("Timeout waiting for available slot after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("exit called without a matching admission (capacity {capacity})")]
    ExitWithoutAdmission { capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent_requests must be at least 1")]
    InvalidCapacity,

    #[error("missing required setting {key}")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("unknown queue policy '{0}', expected 'stack' or 'fifo'")]
    UnknownPolicy(String),
}
