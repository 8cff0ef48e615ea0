//! admission: bounded-concurrency admission control.
//!
//! A [`Limiter`] admits a fixed number of concurrent callers, parks the excess
//! in a [`QueuePolicy`] (newest-first [`StackPolicy`] or oldest-first
//! [`FifoPolicy`]) and hands each freed slot directly to the next waiter.
//! Waiters are resolved through pooled [`ResettableSignal`]s so sustained
//! queueing does not allocate per request.

mod error;
mod limiter;
mod options;
mod permit;
pub mod policy;
pub mod pool;
pub mod signal;
mod stats;

pub use error::{ConfigError, LimiterError, SignalError};
pub use limiter::{Entry, Limiter, Waiting};
pub use options::{
    DEFAULT_QUEUE_LIMIT, ENV_MAX_CONCURRENCY, ENV_POLICY, ENV_QUEUE_LIMIT, LimiterOptions,
    PolicyKind,
};
pub use permit::Permit;
pub use policy::{FifoPolicy, QueuePolicy, StackPolicy, WaiterId};
pub use pool::SignalPool;
pub use signal::{ResettableSignal, SignalStatus, SignalToken, Wakeup, Wakeups};
pub use stats::LimiterStats;

pub use tokio_util::sync::CancellationToken;
