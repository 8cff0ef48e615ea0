//! LIFO ordering: the most recent arrival is admitted first.

use std::sync::Arc;

use super::{QueuePolicy, WaiterId, WaiterQueue};
use crate::options::PolicyKind;
use crate::signal::{ResettableSignal, SignalToken, Wakeups};

#[derive(Debug, Default)]
pub struct StackPolicy {
    queue: WaiterQueue,
}

impl StackPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueuePolicy for StackPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Stack
    }

    fn enqueue(&mut self) -> (WaiterId, SignalToken) {
        self.queue.push()
    }

    fn release_one(&mut self, wakeups: &mut Wakeups) -> bool {
        while let Some(waiter) = self.queue.pop_newest() {
            if waiter.resolve(true, wakeups) {
                return true;
            }
        }
        false
    }

    /// Evicts the oldest waiter with a rejection.
    fn evict_for_newcomer(&mut self, wakeups: &mut Wakeups) -> bool {
        match self.queue.pop_oldest() {
            Some(oldest) => {
                tracing::warn!(waiter = %oldest.id, queued = self.queue.len(), "Queue full - evicting oldest waiter");
                oldest.resolve(false, wakeups);
                true
            }
            None => false,
        }
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
