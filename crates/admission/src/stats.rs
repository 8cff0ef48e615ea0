//! Limiter counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::options::PolicyKind;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    admitted_immediately: AtomicU64,
    queued: AtomicU64,
    admitted_from_queue: AtomicU64,
    rejected: AtomicU64,
    queue_time_us: AtomicU64,
}

impl Counters {
    pub fn record_immediate(&self) {
        self.admitted_immediately.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued caller left the queue, admitted or not.
    pub fn record_dequeued(&self, admitted: bool, waited: Duration) {
        if admitted {
            self.admitted_from_queue.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.queue_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self, gauges: Gauges) -> LimiterStats {
        LimiterStats {
            policy: gauges.policy,
            capacity: gauges.capacity,
            available: gauges.available,
            in_flight: gauges.in_flight,
            queued: gauges.queued,
            queue_limit: gauges.queue_limit,
            total_admitted_immediately: self.admitted_immediately.load(Ordering::Relaxed),
            total_queued: self.queued.load(Ordering::Relaxed),
            total_admitted_from_queue: self.admitted_from_queue.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_queue_time_us: self.queue_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time limiter state, read under the limiter lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Gauges {
    pub policy: PolicyKind,
    pub capacity: usize,
    pub available: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub queue_limit: usize,
}

/// Snapshot of a limiter's state and lifetime counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub policy: PolicyKind,
    pub capacity: usize,
    pub available: usize,
    /// Admitted callers that have not exited yet.
    pub in_flight: usize,
    /// Callers currently waiting.
    pub queued: usize,
    pub queue_limit: usize,
    pub total_admitted_immediately: u64,
    pub total_queued: u64,
    pub total_admitted_from_queue: u64,
    /// Synchronous rejections plus waiters that left the queue without
    /// running: evicted, cancelled, timed out or dropped.
    pub total_rejected: u64,
    pub total_queue_time_us: u64,
}

impl LimiterStats {
    /// No free slot: the next caller will queue or be rejected.
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }

    /// Average time spent queued by callers that have left the queue.
    pub fn mean_queue_time(&self) -> Option<Duration> {
        let dequeued = self.total_queued.checked_sub(self.queued as u64)?;
        if dequeued == 0 {
            return None;
        }
        Some(Duration::from_micros(self.total_queue_time_us / dequeued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entry, Limiter, LimiterOptions};

    fn gauges() -> Gauges {
        Gauges {
            policy: PolicyKind::Stack,
            capacity: 2,
            available: 0,
            in_flight: 2,
            queued: 1,
            queue_limit: 10,
        }
    }

    #[test]
    fn dequeue_outcomes_are_split() {
        let counters = Counters::default();
        counters.record_queued();
        counters.record_queued();
        counters.record_queued();
        counters.record_dequeued(true, Duration::from_micros(300));
        counters.record_dequeued(false, Duration::from_micros(100));

        let stats = counters.snapshot(gauges());
        assert_eq!(stats.total_queued, 3);
        assert_eq!(stats.total_admitted_from_queue, 1);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(stats.total_queue_time_us, 400);
        assert_eq!(stats.mean_queue_time(), Some(Duration::from_micros(200)));
        assert!(stats.is_saturated());
    }

    #[test]
    fn mean_queue_time_none_before_any_dequeue() {
        let counters = Counters::default();
        counters.record_queued();
        assert_eq!(counters.snapshot(gauges()).mean_queue_time(), None);
    }

    #[test]
    fn stats_after_rejection() {
        let limiter = Limiter::new(
            &LimiterOptions::new(2)
                .with_queue_limit(0)
                .with_policy(PolicyKind::Fifo),
        )
        .unwrap();

        assert!(matches!(limiter.try_enter(), Entry::Admitted));
        assert!(matches!(limiter.try_enter(), Entry::Admitted));
        assert!(matches!(limiter.try_enter(), Entry::Rejected));

        insta::assert_json_snapshot!("stats_saturated_fifo", limiter.stats());
    }
}
