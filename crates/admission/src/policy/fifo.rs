//! FIFO ordering: waiters are admitted in arrival order.

use std::sync::Arc;

use super::{QueuePolicy, WaiterId, WaiterQueue};
use crate::options::PolicyKind;
use crate::signal::{ResettableSignal, SignalToken, Wakeups};

#[derive(Debug, Default)]
pub struct FifoPolicy {
    queue: WaiterQueue,
}

impl FifoPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueuePolicy for FifoPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fifo
    }

    fn enqueue(&mut self) -> (WaiterId, SignalToken) {
        self.queue.push()
    }

    fn release_one(&mut self, wakeups: &mut Wakeups) -> bool {
        while let Some(waiter) = self.queue.pop_oldest() {
            if waiter.resolve(true, wakeups) {
                return true;
            }
        }
        false
    }

    /// Queued callers keep their place; the newcomer is turned away.
    fn evict_for_newcomer(&mut self, _wakeups: &mut Wakeups) -> bool {
        false
    }

    fn remove(&mut self, id: WaiterId) -> Option<SignalToken> {
        self.queue.remove(id)
    }

    fn recycle(&mut self, signal: Arc<ResettableSignal>) {
        self.queue.recycle(signal);
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalStatus;

    #[test]
    fn releases_oldest_first() {
        let mut policy = FifoPolicy::new();
        let tokens: Vec<_> = (0..3).map(|_| policy.enqueue().1).collect();
        let mut wakeups = Wakeups::new();

        for released in 0..tokens.len() {
            assert!(policy.release_one(&mut wakeups));
            for (i, token) in tokens.iter().enumerate() {
                let expected = if i <= released {
                    SignalStatus::Completed
                } else {
                    SignalStatus::Pending
                };
                assert_eq!(token.status(), Ok(expected), "waiter {i} after release {released}");
            }
        }
        assert!(!policy.release_one(&mut wakeups));
    }

    #[test]
    fn never_evicts() {
        let mut policy = FifoPolicy::new();
        let (_, token) = policy.enqueue();

        assert!(!policy.evict_for_newcomer(&mut Wakeups::new()));
        assert_eq!(policy.len(), 1);
        assert_eq!(token.status(), Ok(SignalStatus::Pending));
    }

    #[test]
    fn remove_unknown_waiter_is_none() {
        let mut policy = FifoPolicy::new();
        let (id, _) = policy.enqueue();
        assert!(policy.remove(id).is_some());
        assert!(policy.remove(id).is_none());
    }
}
