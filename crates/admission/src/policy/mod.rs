//! Waiter ordering policies.
//!
//! A [`QueuePolicy`] owns the callers parked on a saturated limiter and decides
//! which one receives the next freed slot:
//! - [`StackPolicy`]: newest first. Under overload the caller most likely to
//!   still be waiting gets the slot; old waiters may starve.
//! - [`FifoPolicy`]: oldest first. Bounded wait per caller.
//!
//! Policies are driven exclusively from inside the limiter's critical section.

mod fifo;
mod stack;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

pub use fifo::FifoPolicy;
pub use stack::StackPolicy;

use crate::options::PolicyKind;
use crate::pool::SignalPool;
use crate::signal::{ResettableSignal, SignalToken, Wakeups};

/// Identity of a queued waiter, unique per policy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

pub trait QueuePolicy: Send + fmt::Debug {
    fn kind(&self) -> PolicyKind;

    /// Park a new waiter and return the token it will be resolved through.
    fn enqueue(&mut self) -> (WaiterId, SignalToken);

    /// Resolve the next waiter in policy order with `true`.
    ///
    /// Returns `false` when nobody is waiting.
    fn release_one(&mut self, wakeups: &mut Wakeups) -> bool;

    /// Make room for a newcomer when the queue is at its bound.
    ///
    /// Returns `false` if the policy prefers to turn the newcomer away.
    fn evict_for_newcomer(&mut self, wakeups: &mut Wakeups) -> bool;

    /// Withdraw a waiter that is still queued, leaving its signal unresolved.
    fn remove(&mut self, id: WaiterId) -> Option<SignalToken>;

    /// Return an observed signal to this policy's cache.
    fn recycle(&mut self, signal: Arc<ResettableSignal>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn from_kind(kind: PolicyKind) -> Box<dyn QueuePolicy> {
    match kind {
        PolicyKind::Stack => Box::new(StackPolicy::new()),
        PolicyKind::Fifo => Box::new(FifoPolicy::new()),
    }
}

#[derive(Debug)]
struct Waiter {
    id: WaiterId,
    token: SignalToken,
}

impl Waiter {
    /// Deliver `result`. Returns `false` if the signal had already been
    /// resolved, which means the queue and the signal disagree.
    fn resolve(self, result: bool, wakeups: &mut Wakeups) -> bool {
        match self.token.complete(result) {
            Ok(wakeup) => {
                wakeups.push(wakeup);
                true
            }
            Err(e) => {
                debug_assert!(false, "queued waiter already resolved: {e}");
                tracing::error!(waiter = %self.id, error = %e, "Bug: queued waiter signal already resolved");
                false
            }
        }
    }
}

/// Waiters in arrival order (oldest at the front) plus the signal cache.
#[derive(Debug, Default)]
struct WaiterQueue {
    waiters: VecDeque<Waiter>,
    pool: SignalPool,
    next_id: u64,
}

impl WaiterQueue {
    fn push(&mut self) -> (WaiterId, SignalToken) {
        let id = WaiterId(self.next_id);
        self.next_id += 1;
        let token = self.pool.acquire().token();
        self.waiters.push_back(Waiter {
            id,
            token: token.clone(),
        });
        (id, token)
    }

    fn pop_newest(&mut self) -> Option<Waiter> {
        self.waiters.pop_back()
    }

    fn pop_oldest(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    /// Ids are handed out in arrival order and waiters only leave from the
    /// ends or by id, so the queue stays sorted by id.
    fn remove(&mut self, id: WaiterId) -> Option<SignalToken> {
        let position = self.waiters.binary_search_by_key(&id, |w| w.id).ok()?;
        self.waiters.remove(position).map(|w| w.token)
    }

    fn recycle(&mut self, signal: Arc<ResettableSignal>) {
        self.pool.release(signal);
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalStatus;

    #[test]
    fn from_kind_selects_policy() {
        assert_eq!(from_kind(PolicyKind::Stack).kind(), PolicyKind::Stack);
        assert_eq!(from_kind(PolicyKind::Fifo).kind(), PolicyKind::Fifo);
    }

    #[test]
    fn waiter_ids_are_unique() {
        let mut queue = WaiterQueue::default();
        let (a, _) = queue.push();
        let (b, _) = queue.push();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "waiter-0");
        assert_eq!(b.to_string(), "waiter-1");
    }

    #[test]
    fn remove_leaves_signal_pending() {
        let mut queue = WaiterQueue::default();
        let (first, _) = queue.push();
        let (second, token) = queue.push();

        let removed = queue.remove(second).unwrap();
        assert_eq!(removed.version(), token.version());
        assert_eq!(token.status(), Ok(SignalStatus::Pending));
        assert_eq!(queue.len(), 1);

        assert!(queue.remove(second).is_none());
        assert!(queue.remove(first).is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn remove_finds_waiters_after_pops_from_both_ends() {
        let mut queue = WaiterQueue::default();
        let ids: Vec<_> = (0..6).map(|_| queue.push().0).collect();

        assert_eq!(queue.pop_oldest().map(|w| w.id), Some(ids[0]));
        assert_eq!(queue.pop_newest().map(|w| w.id), Some(ids[5]));
        assert!(queue.remove(ids[3]).is_some());

        assert!(queue.remove(ids[0]).is_none());
        assert!(queue.remove(ids[5]).is_none());
        assert!(queue.remove(ids[3]).is_none());

        let (late, _) = queue.push();
        assert!(queue.remove(ids[2]).is_some());
        assert!(queue.remove(late).is_some());
        assert!(queue.remove(ids[1]).is_some());
        assert!(queue.remove(ids[4]).is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn recycled_signal_backs_next_waiter() {
        let mut queue = WaiterQueue::default();
        let (_, token) = queue.push();
        let waiter = queue.pop_oldest().unwrap();
        let mut wakeups = Wakeups::new();
        assert!(waiter.resolve(true, &mut wakeups));
        assert_eq!(token.try_take(), Ok(Some(true)));

        let signal = Arc::clone(token.signal());
        queue.recycle(token.into_signal());

        let (_, next) = queue.push();
        assert!(Arc::ptr_eq(next.signal(), &signal));
        assert_eq!(next.status(), Ok(SignalStatus::Pending));
    }
}
